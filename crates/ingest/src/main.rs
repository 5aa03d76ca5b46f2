//! Thin CLI driver over `segment_index::IndexWriter`: reads
//! newline-delimited JSON documents from a file and ingests them into an
//! index directory. Not a product surface in its own right — every knob
//! here maps directly onto an `IndexWriterConfig` field or a `Directory`
//! choice the library already exposes.

use std::{
    fs::File,
    io::{
        BufRead,
        BufReader,
    },
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{
    bail,
    Context,
};
use clap::{
    Parser,
    ValueEnum,
};
use common::{
    analyzer::{
        Analyzer,
        Utf8WordAnalyzer,
        WhitespaceAnalyzer,
    },
    directory::{
        Directory,
        FsDirectory,
        RamDirectory,
    },
    doc_id::UpdateContext,
};
use segment_index::{
    ConsolidateAllPolicy,
    ConsolidationPolicy,
    Document,
    FieldFeatures,
    FieldSource,
    IndexWriter,
    IndexWriterConfig,
    TierConsolidationPolicy,
};

metrics::register_counter!(INGEST_DOCUMENTS_TOTAL, "documents ingested by the ingest CLI");

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DirType {
    Fs,
    /// No distinct memory-mapped backend is shipped in this workspace;
    /// `mmap` is accepted for CLI compatibility and behaves like `fs`.
    Mmap,
    Memory,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ingest newline-delimited JSON documents into a segmented index")]
struct Args {
    #[arg(long)]
    index_dir: PathBuf,

    #[arg(long, value_enum, default_value = "fs")]
    dir_type: DirType,

    /// Document codec; only `json` (one JSON object of field name -> string
    /// value per line) is implemented.
    #[arg(long, default_value = "json")]
    format: String,

    #[arg(long = "in")]
    input: PathBuf,

    #[arg(long, default_value_t = 1000)]
    batch_size: usize,

    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    consolidate_all: bool,

    #[arg(long)]
    max_lines: Option<usize>,

    #[arg(long, default_value_t = 1)]
    threads: usize,

    #[arg(long, default_value_t = 1)]
    consolidation_threads: usize,

    #[arg(long, default_value_t = 1000)]
    commit_period: u64,

    #[arg(long, default_value_t = 1000)]
    consolidation_interval: u64,

    #[arg(long, default_value = "whitespace")]
    analyzer_type: String,

    #[arg(long)]
    analyzer_options: Option<String>,

    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    segment_memory_max: usize,
}

/// One field of an ingested document: indexed with the CLI-selected
/// analyzer and always stored, so round-tripping the original text back
/// out through the column store is possible without a second pass.
struct JsonField {
    name: String,
    value: Vec<u8>,
    analyzer: Arc<dyn Analyzer>,
}

impl FieldSource for JsonField {
    fn name(&self) -> &str {
        &self.name
    }

    fn indexed(&self) -> bool {
        true
    }

    fn stored(&self) -> bool {
        true
    }

    fn features(&self) -> FieldFeatures {
        FieldFeatures::positions()
    }

    fn value(&self) -> &[u8] {
        &self.value
    }

    fn analyzer(&self) -> &dyn Analyzer {
        self.analyzer.as_ref()
    }
}

fn build_directory(args: &Args) -> anyhow::Result<Arc<dyn Directory>> {
    match args.dir_type {
        DirType::Fs | DirType::Mmap => {
            let dir = FsDirectory::open(args.index_dir.clone())
                .with_context(|| format!("opening index directory {}", args.index_dir.display()))?;
            Ok(Arc::new(dir))
        },
        DirType::Memory => Ok(Arc::new(RamDirectory::new())),
    }
}

fn build_analyzer(analyzer_type: &str, analyzer_options: Option<&str>) -> anyhow::Result<Arc<dyn Analyzer>> {
    if let Some(options) = analyzer_options {
        serde_json::from_str::<serde_json::Value>(options)
            .with_context(|| "parsing --analyzer-options as JSON".to_string())?;
    }
    match analyzer_type {
        "whitespace" => Ok(Arc::new(WhitespaceAnalyzer)),
        "utf8word" | "utf8_word" => Ok(Arc::new(Utf8WordAnalyzer)),
        other => bail!("unknown --analyzer-type {other:?}; expected \"whitespace\" or \"utf8word\""),
    }
}

fn parse_document(line: &str, analyzer: &Arc<dyn Analyzer>) -> anyhow::Result<Document> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let object = value.as_object().context("each ingested line must be a JSON object")?;
    let mut fields: Document = Vec::with_capacity(object.len());
    for (name, field_value) in object {
        let text = match field_value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        fields.push(Box::new(JsonField {
            name: name.clone(),
            value: text.into_bytes(),
            analyzer: analyzer.clone(),
        }));
    }
    Ok(fields)
}

fn index_writer_config(args: &Args) -> IndexWriterConfig {
    let policy: Arc<dyn ConsolidationPolicy> = if args.consolidate_all {
        Arc::new(ConsolidateAllPolicy)
    } else {
        Arc::new(TierConsolidationPolicy::default())
    };
    IndexWriterConfig::new()
        .segment_pool_size(args.threads.max(1))
        .segment_memory_max(args.segment_memory_max)
        .consolidation_threads(args.consolidation_threads)
        .consolidation_interval(Duration::from_millis(args.consolidation_interval))
        .commit_period(Duration::from_millis(args.commit_period))
        .consolidation_policy(policy)
}

fn ingest_lines(writer: &IndexWriter, lines: &[String], analyzer: &Arc<dyn Analyzer>, batch_size: usize) -> anyhow::Result<usize> {
    let mut ingested = 0usize;
    let mut txn = writer.documents();
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_document(line, analyzer)?;
        txn.insert(&fields, UpdateContext {
            generation: 0,
            update_id: i as u64,
        });
        ingested += 1;
        metrics::log_counter(&INGEST_DOCUMENTS_TOTAL, 1);
        if ingested % batch_size == 0 {
            drop(txn);
            writer.commit().context("committing a batch")?;
            txn = writer.documents();
        }
    }
    drop(txn);
    Ok(ingested)
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.format != "json" {
        bail!("unsupported --format {:?}; only \"json\" is implemented", args.format);
    }

    let directory = build_directory(args)?;
    let analyzer = build_analyzer(&args.analyzer_type, args.analyzer_options.as_deref())?;

    let file = File::open(&args.input).with_context(|| format!("opening --in file {}", args.input.display()))?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.context("reading a line from --in file")?;
        lines.push(line);
        if let Some(max_lines) = args.max_lines {
            if lines.len() >= max_lines {
                break;
            }
        }
    }

    let config = index_writer_config(args);
    let writer = IndexWriter::open(directory, config).context("opening index writer")?;

    let thread_count = args.threads.max(1);
    let chunks: Vec<Vec<String>> = (0..thread_count)
        .map(|t| lines.iter().skip(t).step_by(thread_count).cloned().collect())
        .collect();

    let total_ingested = std::thread::scope(|scope| -> anyhow::Result<usize> {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let writer = &writer;
                let analyzer = analyzer.clone();
                scope.spawn(move || ingest_lines(writer, &chunk, &analyzer, args.batch_size))
            })
            .collect();
        let mut total = 0usize;
        for handle in handles {
            total += handle.join().expect("ingestion worker thread panicked")?;
        }
        Ok(total)
    })?;

    writer.commit().context("final commit before shutdown")?;
    writer.shutdown().context("shutting down index writer")?;
    tracing::info!(documents = total_ingested, "ingestion complete");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        tracing::error!(error = ?err, "ingestion failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
