//! Index writer (component G): the concurrent top-level owner of many
//! segment writers, the index manifest, and the background consolidation
//! loop.

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
        Arc,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::Duration,
};

use common::{
    directory::Directory,
    doc_id::{
        DocId,
        UpdateContext,
    },
    errors::IndexError,
};
use crossbeam_channel::{
    Receiver,
    Sender,
};
use parking_lot::{
    Condvar,
    Mutex,
};
use tracing::instrument;

use crate::{
    consolidation::{
        ConsolidationPolicy,
        TierConsolidationPolicy,
    },
    field::Document,
    manifest::Manifest,
    merge_writer::{
        MergeWriter,
        MergeWriterConfig,
        ReaderRef,
    },
    pool::SegmentWriterPool,
    segment_meta::SegmentMeta,
    segment_reader::SegmentReader,
    segment_writer::{
        SegmentWriter,
        SegmentWriterConfig,
    },
};

metrics::register_counter!(SEGMENTS_FLUSHED_TOTAL, "segments flushed by the index writer");
metrics::register_counter!(CONSOLIDATION_MERGES_TOTAL, "consolidation merges performed");
metrics::register_counter!(DOCUMENTS_MASKED_TOTAL, "documents masked due to partial-insert failures");
metrics::register_histogram!(COMMIT_LATENCY_SECONDS, "commit wall-clock latency in seconds");

/// Builder-style configuration for an [`IndexWriter`]. Construction is
/// explicit data rather than parsed from the environment, since this is
/// an embeddable library, not a standalone service with process-wide
/// knobs.
#[derive(Clone)]
pub struct IndexWriterConfig {
    pub segment_pool_size: usize,
    pub segment_memory_max: usize,
    pub skip_0: usize,
    pub skip_n: usize,
    pub max_skip_levels: usize,
    pub column_sparse_stride: usize,
    pub consolidation_threads: usize,
    pub consolidation_interval: Duration,
    pub commit_period: Duration,
    pub consolidation_policy: Arc<dyn ConsolidationPolicy>,
}

impl Default for IndexWriterConfig {
    fn default() -> Self {
        IndexWriterConfig {
            segment_pool_size: 4,
            segment_memory_max: 32 * 1024 * 1024,
            skip_0: 8,
            skip_n: 8,
            max_skip_levels: 8,
            column_sparse_stride: 16,
            consolidation_threads: 1,
            consolidation_interval: Duration::from_millis(1000),
            commit_period: Duration::from_millis(1000),
            consolidation_policy: Arc::new(TierConsolidationPolicy::default()),
        }
    }
}

impl IndexWriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_pool_size(mut self, v: usize) -> Self {
        self.segment_pool_size = v;
        self
    }

    pub fn segment_memory_max(mut self, v: usize) -> Self {
        self.segment_memory_max = v;
        self
    }

    pub fn skip_params(mut self, skip_0: usize, skip_n: usize) -> Self {
        self.skip_0 = skip_0;
        self.skip_n = skip_n;
        self
    }

    pub fn consolidation_threads(mut self, v: usize) -> Self {
        self.consolidation_threads = v.max(1);
        self
    }

    pub fn consolidation_interval(mut self, v: Duration) -> Self {
        self.consolidation_interval = v;
        self
    }

    pub fn commit_period(mut self, v: Duration) -> Self {
        self.commit_period = v;
        self
    }

    pub fn consolidation_policy(mut self, policy: Arc<dyn ConsolidationPolicy>) -> Self {
        self.consolidation_policy = policy;
        self
    }

    fn segment_writer_config(&self) -> SegmentWriterConfig {
        SegmentWriterConfig {
            skip_0: self.skip_0,
            skip_n: self.skip_n,
            max_skip_levels: self.max_skip_levels,
            column_sparse_stride: self.column_sparse_stride,
        }
    }

    fn merge_writer_config(&self) -> MergeWriterConfig {
        MergeWriterConfig {
            skip_0: self.skip_0,
            skip_n: self.skip_n,
            max_skip_levels: self.max_skip_levels,
            column_sparse_stride: self.column_sparse_stride,
        }
    }
}

/// A condition-variable-backed "has something happened" flag, used for
/// both the commit and consolidation notifiers: a `(Mutex<bool>,
/// Condvar)` pair, favoring an explicit wake flag over a bare
/// `Condvar::wait` (which is vulnerable to missed wakeups if the
/// condition is set between a waiter checking it and calling `wait`).
#[derive(Default)]
struct Notifier {
    flagged: Mutex<bool>,
    condvar: Condvar,
}

impl Notifier {
    fn notify(&self) {
        *self.flagged.lock() = true;
        self.condvar.notify_all();
    }

    /// Waits up to `timeout` for a notification, or returns immediately
    /// if one is already pending. Always clears the flag before
    /// returning.
    fn wait(&self, timeout: Duration) {
        let mut flagged = self.flagged.lock();
        if !*flagged {
            self.condvar.wait_for(&mut flagged, timeout);
        }
        *flagged = false;
    }
}

struct PendingChanges {
    /// Segments flushed outside the commit path's own drain. Currently
    /// unused by the single flush channel below; kept so a future flush
    /// path that publishes outside a channel hand-off has somewhere to
    /// stage its result.
    new_segments: Vec<SegmentMeta>,
    /// `(old segment names, replacement)` pairs produced by consolidation,
    /// applied to the manifest at the next commit.
    consolidated: Vec<(Vec<String>, SegmentMeta)>,
}

struct Inner {
    directory: Arc<dyn Directory>,
    config: IndexWriterConfig,
    pool: SegmentWriterPool,
    segment_counter: AtomicU64,
    manifest: Mutex<Manifest>,
    commit_mutex: Mutex<()>,
    pending: Mutex<PendingChanges>,
    flush_tx: Sender<SegmentWriter>,
    flush_rx: Receiver<SegmentWriter>,
    in_flight_consolidations: Mutex<HashSet<String>>,
    stop: AtomicBool,
    commit_notifier: Notifier,
    consolidation_notifier: Notifier,
}

impl Inner {
    fn next_segment_name(&self) -> String {
        format!("_{}", self.segment_counter.fetch_add(1, Ordering::SeqCst))
    }

    #[instrument(level = "info", skip(self))]
    fn commit(&self) -> Result<(), IndexError> {
        let _guard = self.commit_mutex.lock();
        let timer = metrics::Timer::new(&COMMIT_LATENCY_SECONDS);

        let mut new_segments = Vec::new();
        loop {
            let next = self.flush_rx.try_recv();
            let Ok(mut writer) = next else {
                break;
            };
            match writer.flush() {
                Ok(Some(meta)) => {
                    metrics::log_counter(&SEGMENTS_FLUSHED_TOTAL, 1);
                    new_segments.push(meta);
                },
                Ok(None) => {},
                Err(err) => {
                    tracing::warn!(error = %err, "discarding segment that failed to flush");
                },
            }
            writer.reset(Some(self.next_segment_name()));
            self.pool.release(writer);
        }

        let mut pending = self.pending.lock();
        new_segments.append(&mut pending.new_segments);
        let consolidated = std::mem::take(&mut pending.consolidated);
        drop(pending);

        let mut manifest = self.manifest.lock();
        let mut live = manifest.segments.clone();
        let mut removed_files = Vec::new();
        for (old_names, new_meta) in &consolidated {
            let mut kept = Vec::with_capacity(live.len());
            for segment in live {
                if old_names.contains(&segment.name) {
                    removed_files.extend(segment.files.iter().cloned());
                } else {
                    kept.push(segment);
                }
            }
            live = kept;
            live.push(new_meta.clone());
        }
        live.extend(new_segments);

        let next_manifest = manifest.next_generation(live);
        write_manifest(&*self.directory, &next_manifest)?;
        *manifest = next_manifest;
        drop(manifest);
        drop(timer);

        // No open-reader snapshots are tracked by this library, so a
        // segment dropped from the manifest is immediately eligible for
        // deletion. A deployment that also embeds a query-side reader
        // layer would instead defer this to a reference count that
        // accounts for open readers too.
        for file in removed_files {
            if let Err(err) = self.directory.remove(&file) {
                tracing::warn!(file = %file, error = %err, "failed to remove obsolete segment file");
            }
        }

        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn run_consolidation_iteration(&self) -> Result<(), IndexError> {
        let snapshot = self.manifest.lock().segments.clone();
        let mut in_flight = self.in_flight_consolidations.lock();
        let candidates: Vec<SegmentMeta> = snapshot
            .into_iter()
            .filter(|s| !in_flight.contains(&s.name))
            .collect();
        let selected = self.config.consolidation_policy.select(&candidates);
        if selected.len() < 2 {
            return Ok(());
        }
        for segment in &selected {
            in_flight.insert(segment.name.clone());
        }
        drop(in_flight);

        let result = self.merge_segments(&selected);

        let mut in_flight = self.in_flight_consolidations.lock();
        for segment in &selected {
            in_flight.remove(&segment.name);
        }
        drop(in_flight);

        match result {
            Ok(Some(new_meta)) => {
                metrics::log_counter(&CONSOLIDATION_MERGES_TOTAL, 1);
                let old_names = selected.iter().map(|s| s.name.clone()).collect();
                self.pending.lock().consolidated.push((old_names, new_meta));
                self.commit_notifier.notify();
                Ok(())
            },
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn merge_segments(&self, selected: &[SegmentMeta]) -> Result<Option<SegmentMeta>, IndexError> {
        let readers: Vec<SegmentReader> = selected
            .iter()
            .map(|meta| SegmentReader::open(self.directory.clone(), meta.clone(), self.config.skip_0, self.config.skip_n))
            .collect::<Result<_, _>>()?;
        let reader_refs: Vec<ReaderRef<'_>> = readers.iter().map(ReaderRef::Borrowed).collect();
        let target_name = self.next_segment_name();
        let merge_writer = MergeWriter::new(self.directory.clone(), self.config.merge_writer_config());
        merge_writer.merge(&reader_refs, &target_name)
    }
}

fn manifest_file_name(generation: u64) -> String {
    format!("manifest.{generation:020}")
}

fn manifest_temp_file_name(generation: u64) -> String {
    format!("manifest.{generation:020}.tmp")
}

/// Writes a manifest to a temp file, then publishes it with a rename.
/// Since only the final (non-`.tmp`) name is ever a candidate when
/// re-reading the current manifest, a crash between the two steps leaves
/// the previous manifest as the only one discoverable.
fn write_manifest(directory: &dyn Directory, manifest: &Manifest) -> Result<(), IndexError> {
    let temp_name = manifest_temp_file_name(manifest.generation);
    let final_name = manifest_file_name(manifest.generation);
    let mut bytes = Vec::new();
    manifest.encode(&mut bytes)?;
    let mut out = directory.create(&temp_name)?;
    std::io::Write::write_all(&mut out, &bytes)?;
    out.finish()?;
    directory.rename(&temp_name, &final_name)?;
    Ok(())
}

fn read_current_manifest(directory: &dyn Directory) -> Result<Manifest, IndexError> {
    let mut best: Option<(u64, String)> = None;
    for name in directory.list()? {
        let Some(rest) = name.strip_prefix("manifest.") else {
            continue;
        };
        if rest.ends_with(".tmp") {
            continue;
        }
        if let Ok(generation) = rest.parse::<u64>() {
            if best.as_ref().map_or(true, |(g, _)| generation > *g) {
                best = Some((generation, name));
            }
        }
    }
    match best {
        Some((_, name)) => {
            let mut input = directory.open(&name)?;
            Ok(Manifest::decode(&mut input)?)
        },
        None => Ok(Manifest::empty()),
    }
}

fn committer_loop(inner: Arc<Inner>) {
    loop {
        inner.commit_notifier.wait(inner.config.commit_period);
        if let Err(err) = inner.commit() {
            tracing::warn!(error = %err, "commit failed; will retry next iteration");
        }
        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
    }
}

fn consolidation_loop(inner: Arc<Inner>) {
    loop {
        inner.consolidation_notifier.wait(inner.config.consolidation_interval);
        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
        if let Err(err) = inner.run_consolidation_iteration() {
            tracing::warn!(error = %err, "consolidation iteration failed; continuing");
        }
    }
}

/// The concurrent owner of many segment writers: leases them out to
/// ingestion transactions, drives periodic commits, and runs background
/// consolidation. Dropping an `IndexWriter` without calling
/// [`IndexWriter::shutdown`] leaves its background threads detached but
/// running; `shutdown` is the graceful, joinable stop path.
pub struct IndexWriter {
    inner: Arc<Inner>,
    committer: Option<JoinHandle<()>>,
    consolidators: Vec<JoinHandle<()>>,
}

impl IndexWriter {
    #[instrument(level = "info", skip(directory, config))]
    pub fn open(directory: Arc<dyn Directory>, config: IndexWriterConfig) -> Result<Self, IndexError> {
        let manifest = read_current_manifest(&*directory)?;
        let initial_counter = manifest
            .segments
            .iter()
            .filter_map(|s| s.name.strip_prefix('_'))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .map_or(0, |n| n + 1);

        let (flush_tx, flush_rx) = crossbeam_channel::unbounded();
        let segment_writer_config = config.segment_writer_config();
        let pool_size = config.segment_pool_size.max(1);
        let pool = SegmentWriterPool::new(directory.clone(), segment_writer_config, pool_size, |i| format!("_pool{i}"));

        let inner = Arc::new(Inner {
            directory,
            config: config.clone(),
            pool,
            segment_counter: AtomicU64::new(initial_counter),
            manifest: Mutex::new(manifest),
            commit_mutex: Mutex::new(()),
            pending: Mutex::new(PendingChanges {
                new_segments: Vec::new(),
                consolidated: Vec::new(),
            }),
            flush_tx,
            flush_rx,
            in_flight_consolidations: Mutex::new(HashSet::new()),
            stop: AtomicBool::new(false),
            commit_notifier: Notifier::default(),
            consolidation_notifier: Notifier::default(),
        });

        let committer_inner = inner.clone();
        let committer = thread::Builder::new()
            .name("index-writer-committer".to_string())
            .spawn(move || committer_loop(committer_inner))
            .expect("failed to spawn committer thread");

        let mut consolidators = Vec::with_capacity(config.consolidation_threads);
        for i in 0..config.consolidation_threads {
            let consolidator_inner = inner.clone();
            let handle = thread::Builder::new()
                .name(format!("index-writer-consolidation-{i}"))
                .spawn(move || consolidation_loop(consolidator_inner))
                .expect("failed to spawn consolidation thread");
            consolidators.push(handle);
        }

        Ok(IndexWriter {
            inner,
            committer: Some(committer),
            consolidators,
        })
    }

    /// Opens a transaction scope over a freshly leased segment writer.
    /// Blocks if every pooled writer is currently leased.
    pub fn documents(&self) -> Transaction<'_> {
        Transaction {
            inner: &self.inner,
            current: None,
            pending_bytes: 0,
            aborted: false,
        }
    }

    /// Flushes any writers handed off by completed transactions, folds in
    /// pending consolidation replacements, and publishes a new manifest
    /// generation. Safe to call even with nothing pending: the generation
    /// advances and the segment list is left unchanged.
    pub fn commit(&self) -> Result<(), IndexError> {
        self.inner.commit()
    }

    pub fn current_manifest(&self) -> Manifest {
        self.inner.manifest.lock().clone()
    }

    pub fn directory(&self) -> Arc<dyn Directory> {
        self.inner.directory.clone()
    }

    /// Signals the committer and consolidation threads to finish their
    /// current iteration and stop, joins them, then runs one last commit
    /// so nothing handed off just before shutdown is lost.
    pub fn shutdown(mut self) -> Result<(), IndexError> {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.commit_notifier.notify();
        self.inner.consolidation_notifier.notify();
        if let Some(handle) = self.committer.take() {
            let _ = handle.join();
        }
        for handle in self.consolidators.drain(..) {
            let _ = handle.join();
        }
        self.inner.commit()
    }
}

/// A transaction scope leased from the index writer's pool. Repeated
/// [`Transaction::insert`] calls go through the same leased writer until
/// its accumulated memory crosses
/// `segment_memory_max`, at which point it's handed to the committer for
/// an asynchronous flush and a fresh writer is leased transparently.
pub struct Transaction<'a> {
    inner: &'a Inner,
    current: Option<SegmentWriter>,
    pending_bytes: usize,
    aborted: bool,
}

impl<'a> Transaction<'a> {
    fn ensure_writer(&mut self) {
        if self.current.is_none() {
            self.current = Some(self.inner.pool.lease());
            self.pending_bytes = 0;
        }
    }

    fn approx_bytes(fields: &Document) -> usize {
        fields.iter().map(|f| f.value().len()).sum()
    }

    /// Indexes and/or stores one document. Returns `false` if any
    /// indexed field failed for it.
    pub fn insert(&mut self, fields: &Document, ctx: UpdateContext) -> bool {
        self.ensure_writer();
        let success = self.current.as_mut().expect("ensure_writer always leases one").insert(fields, ctx);
        if !success {
            metrics::log_counter(&DOCUMENTS_MASKED_TOTAL, 1);
        }
        self.pending_bytes += Self::approx_bytes(fields);
        if self.pending_bytes >= self.inner.config.segment_memory_max {
            self.flush_current_async();
        }
        success
    }

    /// Masks `doc_id` (previously inserted earlier in this same
    /// transaction) before inserting `fields`, for upsert-style replace
    /// semantics. Resolving a filter against already-published segments
    /// requires a query planner this crate doesn't implement; replacing a
    /// document committed in an earlier transaction isn't supported by
    /// this entry point.
    pub fn replace(&mut self, superseded: DocId, fields: &Document, ctx: UpdateContext) -> bool {
        if let Some(writer) = self.current.as_mut() {
            writer.mask(superseded);
        }
        self.insert(fields, ctx)
    }

    fn flush_current_async(&mut self) {
        if let Some(writer) = self.current.take() {
            let _ = self.inner.flush_tx.send(writer);
            self.pending_bytes = 0;
            self.inner.commit_notifier.notify();
        }
    }

    /// Marks the transaction as aborted: its in-progress writer is reset
    /// and returned to the pool without being handed off for flushing, so
    /// none of its documents are ever published.
    pub fn abort(mut self) {
        self.aborted = true;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let Some(mut writer) = self.current.take() else {
            return;
        };
        if self.aborted {
            writer.reset(Some(self.inner.next_segment_name()));
            self.inner.pool.release(writer);
        } else {
            let _ = self.inner.flush_tx.send(writer);
            self.inner.commit_notifier.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;

    use common::{
        analyzer::WhitespaceAnalyzer,
        directory::RamDirectory,
    };

    use super::*;
    use crate::{
        consolidation::ConsolidateAllPolicy,
        field::SimpleField,
        posting::FieldFeatures,
    };

    fn ctx(id: u64) -> UpdateContext {
        UpdateContext {
            generation: 0,
            update_id: id,
        }
    }

    fn doc(text: &str) -> Document {
        vec![Box::new(SimpleField::new(
            "body",
            true,
            true,
            FieldFeatures::positions(),
            text.as_bytes().to_vec(),
            WhitespaceAnalyzer,
        ))]
    }

    #[test]
    fn insert_then_commit_publishes_a_segment() {
        let dir: Arc<dyn Directory> = StdArc::new(RamDirectory::new());
        let config = IndexWriterConfig::new()
            .segment_pool_size(1)
            .consolidation_interval(Duration::from_secs(3600))
            .commit_period(Duration::from_secs(3600));
        let writer = IndexWriter::open(dir, config).unwrap();

        {
            let mut txn = writer.documents();
            assert!(txn.insert(&doc("alpha beta"), ctx(1)));
        }
        writer.commit().unwrap();

        let manifest = writer.current_manifest();
        assert_eq!(manifest.segments.len(), 1);
        assert_eq!(manifest.segments[0].doc_count, 1);

        writer.shutdown().unwrap();
    }

    #[test]
    fn aborted_transaction_publishes_nothing() {
        let dir: Arc<dyn Directory> = StdArc::new(RamDirectory::new());
        let config = IndexWriterConfig::new()
            .segment_pool_size(1)
            .consolidation_interval(Duration::from_secs(3600))
            .commit_period(Duration::from_secs(3600));
        let writer = IndexWriter::open(dir, config).unwrap();

        {
            let mut txn = writer.documents();
            txn.insert(&doc("should not survive"), ctx(1));
            txn.abort();
        }
        writer.commit().unwrap();

        assert!(writer.current_manifest().segments.is_empty());
        writer.shutdown().unwrap();
    }

    #[test]
    fn commit_with_nothing_pending_only_bumps_generation() {
        let dir: Arc<dyn Directory> = StdArc::new(RamDirectory::new());
        let config = IndexWriterConfig::new()
            .segment_pool_size(1)
            .consolidation_interval(Duration::from_secs(3600))
            .commit_period(Duration::from_secs(3600));
        let writer = IndexWriter::open(dir, config).unwrap();

        let before = writer.current_manifest();
        writer.commit().unwrap();
        let after = writer.current_manifest();

        assert_eq!(after.generation, before.generation + 1);
        assert_eq!(after.segments, before.segments);
        writer.shutdown().unwrap();
    }

    #[test]
    fn manifest_survives_reopen() {
        let dir: Arc<dyn Directory> = StdArc::new(RamDirectory::new());
        let config = IndexWriterConfig::new().segment_pool_size(1);
        let writer = IndexWriter::open(dir.clone(), config.clone()).unwrap();
        {
            let mut txn = writer.documents();
            txn.insert(&doc("persisted"), ctx(1));
        }
        writer.shutdown().unwrap();

        let reopened = IndexWriter::open(dir, config).unwrap();
        assert_eq!(reopened.current_manifest().segments.len(), 1);
        reopened.shutdown().unwrap();
    }

    #[test]
    fn consolidation_merges_all_segments_under_consolidate_all() {
        let dir: Arc<dyn Directory> = StdArc::new(RamDirectory::new());
        let config = IndexWriterConfig::new()
            .segment_pool_size(2)
            .consolidation_policy(StdArc::new(ConsolidateAllPolicy))
            .consolidation_interval(Duration::from_millis(20))
            .commit_period(Duration::from_millis(20));
        let writer = IndexWriter::open(dir, config).unwrap();

        for text in ["one", "two"] {
            let mut txn = writer.documents();
            txn.insert(&doc(text), ctx(1));
            drop(txn);
            writer.commit().unwrap();
        }

        // Give the consolidation thread a few iterations to run and the
        // committer a chance to publish its result.
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(30));
            writer.commit().unwrap();
            if writer.current_manifest().segments.len() == 1 {
                break;
            }
        }

        let manifest = writer.current_manifest();
        assert_eq!(manifest.segments.len(), 1);
        assert_eq!(manifest.segments[0].doc_count, 2);
        writer.shutdown().unwrap();
    }
}
