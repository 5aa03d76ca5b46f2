//! A document masked after an otherwise-successful insert (standing in for
//! a document whose indexing failed partway through a later field) must
//! not surface in queries against fields it did index, and must not count
//! toward the segment's live total.

use std::sync::Arc;

use common::{
    analyzer::WhitespaceAnalyzer,
    directory::RamDirectory,
    doc_id::UpdateContext,
};
use segment_index::{
    Document,
    FieldFeatures,
    SegmentReader,
    SegmentWriter,
    SegmentWriterConfig,
    SimpleField,
};

fn ctx(update_id: u64) -> UpdateContext {
    UpdateContext {
        generation: 0,
        update_id,
    }
}

fn body_field(text: &str) -> Document {
    vec![Box::new(SimpleField::new(
        "body",
        true,
        false,
        FieldFeatures::positions(),
        text.as_bytes().to_vec(),
        WhitespaceAnalyzer,
    ))]
}

#[test]
fn masked_document_is_invisible_to_queries_but_still_counted_in_doc_count() {
    let dir: Arc<dyn common::directory::Directory> = Arc::new(RamDirectory::new());
    let mut writer = SegmentWriter::new(dir.clone(), "_0", SegmentWriterConfig::default());

    assert!(writer.insert(&body_field("alpha beta"), ctx(1)));
    // Simulates a document whose second field failed to index after the
    // first field's tokens were already accumulated: the caller masks the
    // doc_id it was assigned rather than leaving it partially visible.
    let failing = writer.insert(&body_field("alpha gamma"), ctx(2));
    assert!(failing);
    writer.mask(common::doc_id::DocId(2));
    assert!(writer.insert(&body_field("alpha delta"), ctx(3)));

    let meta = writer.flush().unwrap().unwrap();
    assert_eq!(meta.doc_count, 3);

    let reader = SegmentReader::open(dir, meta, 8, 8).unwrap();
    assert_eq!(reader.doc_count(), 3);
    assert_eq!(reader.live_count(), 2);
    assert!(!reader.is_live(common::doc_id::DocId(2)));

    let term_reader = reader.open_term_reader("body", 8, 8).unwrap().unwrap();
    let alpha = term_reader.find(b"alpha").unwrap();
    let mut postings = term_reader.postings(alpha, FieldFeatures::positions()).unwrap();
    let mut live_docs = Vec::new();
    while let Some((doc_id, _freq)) = postings.advance().unwrap() {
        if reader.is_live(doc_id) {
            live_docs.push(doc_id.0);
        }
    }
    assert_eq!(live_docs, vec![1, 3]);

    let gamma = term_reader.find(b"gamma");
    if let Some(entry) = gamma {
        let mut postings = term_reader.postings(entry, FieldFeatures::positions()).unwrap();
        while let Some((doc_id, _freq)) = postings.advance().unwrap() {
            assert!(!reader.is_live(doc_id), "masked document must not resolve live for its own terms");
        }
    }
}
