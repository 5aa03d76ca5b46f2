//! One document, one field, three tokens with a repeated term: confirms
//! per-term posting lists carry the right frequency and position sequence
//! all the way from `insert` through a flushed segment back out through
//! `SegmentReader`.

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

#[test]
fn repeated_term_accumulates_positions_in_order() {
    let dir: Arc<dyn common::directory::Directory> = Arc::new(RamDirectory::new());
    let mut writer = SegmentWriter::new(dir.clone(), "_0", SegmentWriterConfig::default());

    let fields: Document = vec![Box::new(SimpleField::new(
        "body",
        true,
        false,
        FieldFeatures::positions(),
        b"a b a".to_vec(),
        WhitespaceAnalyzer,
    ))];
    assert!(writer.insert(&fields, ctx(1)));

    let meta = writer.flush().unwrap().expect("one document flushes a segment");
    assert_eq!(meta.doc_count, 1);

    let reader = SegmentReader::open(dir, meta, 8, 8).unwrap();
    let term_reader = reader.open_term_reader("body", 8, 8).unwrap().unwrap();

    let a_entry = term_reader.find(b"a").expect("'a' indexed");
    assert_eq!(a_entry.doc_frequency, 1);
    assert_eq!(a_entry.total_term_frequency, 2);
    let mut a_postings = term_reader.postings(a_entry, FieldFeatures::positions()).unwrap();
    let (doc, freq) = a_postings.advance().unwrap().expect("one posting for 'a'");
    assert_eq!(doc.0, 1);
    assert_eq!(freq, 2);
    assert_eq!(a_postings.positions(), &[0, 2]);
    assert!(a_postings.advance().unwrap().is_none());

    let b_entry = term_reader.find(b"b").expect("'b' indexed");
    assert_eq!(b_entry.doc_frequency, 1);
    assert_eq!(b_entry.total_term_frequency, 1);
    let mut b_postings = term_reader.postings(b_entry, FieldFeatures::positions()).unwrap();
    let (doc, freq) = b_postings.advance().unwrap().expect("one posting for 'b'");
    assert_eq!(doc.0, 1);
    assert_eq!(freq, 1);
    assert_eq!(b_postings.positions(), &[1]);
    // "b" is the second token (index 1), its own position is independent of "a"'s.
    assert!(b_postings.advance().unwrap().is_none());
}
