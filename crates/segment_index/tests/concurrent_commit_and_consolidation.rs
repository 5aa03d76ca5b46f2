//! Several indexer threads write concurrently against one `IndexWriter`
//! while a background consolidation policy merges segments on its own
//! schedule. After every thread finishes and a final commit runs, the
//! manifest must account for every document exactly once, spread over a
//! small number of segments rather than one per flush.
//!
//! Scaled down from a production-sized stress run (tens of thousands of
//! documents per thread) to a size that still exercises the same
//! concurrency paths without turning this into a multi-minute test.

use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use common::{
    analyzer::WhitespaceAnalyzer,
    directory::{
        Directory,
        RamDirectory,
    },
    doc_id::UpdateContext,
};
use segment_index::{
    consolidation::TierConsolidationPolicy,
    Document,
    FieldFeatures,
    IndexWriter,
    IndexWriterConfig,
    SimpleField,
};

const THREADS: u64 = 4;
const DOCS_PER_THREAD: u64 = 250;

fn doc(text: &str) -> Document {
    vec![Box::new(SimpleField::new(
        "body",
        true,
        false,
        FieldFeatures::frequency(),
        text.as_bytes().to_vec(),
        WhitespaceAnalyzer,
    ))]
}

#[test]
fn all_documents_survive_concurrent_indexing_and_consolidation() {
    let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
    let config = IndexWriterConfig::new()
        .segment_pool_size(THREADS as usize)
        .segment_memory_max(512)
        .consolidation_policy(Arc::new(TierConsolidationPolicy {
            min_segments: 2,
            segments_per_merge: 4,
        }))
        .consolidation_interval(Duration::from_millis(100))
        .commit_period(Duration::from_millis(50));
    let writer = Arc::new(IndexWriter::open(dir, config).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_idx| {
            let writer = writer.clone();
            thread::spawn(move || {
                let mut txn = writer.documents();
                for doc_idx in 0..DOCS_PER_THREAD {
                    txn.insert(&doc("shared term unique payload"), UpdateContext {
                        generation: 0,
                        update_id: thread_idx * DOCS_PER_THREAD + doc_idx,
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Let the committer and consolidation threads catch up.
    for _ in 0..40 {
        thread::sleep(Duration::from_millis(50));
        writer.commit().unwrap();
    }

    let writer = Arc::try_unwrap(writer).unwrap_or_else(|_| panic!("all threads joined, no other owners remain"));
    writer.commit().unwrap();
    let manifest = writer.current_manifest();

    let total_docs: u64 = manifest.segments.iter().map(|s| s.doc_count).sum();
    assert_eq!(total_docs, THREADS * DOCS_PER_THREAD);
    assert!(
        manifest.segments.len() <= THREADS as usize,
        "consolidation should have kept the live segment count bounded, found {}",
        manifest.segments.len()
    );

    writer.shutdown().unwrap();
}
