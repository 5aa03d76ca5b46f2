//! A crash between writing a manifest's temp file and renaming it into
//! place must leave the previous manifest as the only one a reopen can
//! observe, with none of its segment files deleted.

use std::{
    sync::Arc,
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
    Document,
    FieldFeatures,
    IndexWriter,
    IndexWriterConfig,
    Manifest,
    SegmentMeta,
    SimpleField,
};

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

fn settle_config() -> IndexWriterConfig {
    IndexWriterConfig::new()
        .segment_pool_size(1)
        .consolidation_interval(Duration::from_secs(3600))
        .commit_period(Duration::from_secs(3600))
}

#[test]
fn tmp_manifest_without_a_rename_is_invisible_on_reopen() {
    let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());

    let writer = IndexWriter::open(dir.clone(), settle_config()).unwrap();
    {
        let mut txn = writer.documents();
        assert!(txn.insert(&doc("durable document"), UpdateContext {
            generation: 0,
            update_id: 1,
        }));
    }
    writer.commit().unwrap();
    let committed = writer.current_manifest();
    assert_eq!(committed.generation, 1);
    assert_eq!(committed.segments.len(), 1);
    writer.shutdown().unwrap();

    // Simulate a crash partway through publishing the next generation: the
    // temp file lands on disk, but the rename that would make it current
    // never happens.
    let crashed = Manifest {
        generation: committed.generation + 1,
        segments: vec![SegmentMeta::new("_dangling", 5, vec!["_dangling.mask".to_string()])],
    };
    let temp_name = format!("manifest.{:020}.tmp", crashed.generation);
    let mut bytes = Vec::new();
    crashed.encode(&mut bytes).unwrap();
    let mut out = dir.create(&temp_name).unwrap();
    std::io::Write::write_all(&mut out, &bytes).unwrap();
    out.finish().unwrap();
    assert!(dir.exists(&temp_name).unwrap());

    let reopened = IndexWriter::open(dir.clone(), settle_config()).unwrap();
    let observed = reopened.current_manifest();
    assert_eq!(observed.generation, committed.generation);
    assert_eq!(observed.segments, committed.segments);

    for segment in &committed.segments {
        for file in &segment.files {
            assert!(dir.exists(file).unwrap(), "segment file {file} must survive an aborted publish");
        }
    }

    reopened.shutdown().unwrap();
}
