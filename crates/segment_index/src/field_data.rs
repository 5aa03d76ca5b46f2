//! Per-field term dictionary (component C): the hashed `term_bytes ->
//! postings` mapping a [`crate::segment_writer::SegmentWriter`] keeps open
//! for one field while a segment is being built, plus the dictionary-order
//! walk used when flushing.

use std::{
    collections::HashMap,
    io,
};

use common::{
    doc_id::DocId,
    errors::IndexError,
    varint::{
        write_bytes,
        write_varlong,
    },
};

use crate::{
    posting::{
        FieldFeatures,
        TermPostings,
    },
    skip::SkipWriter,
};

pub struct FieldData {
    name: String,
    features: FieldFeatures,
    terms: HashMap<Vec<u8>, TermPostings>,
    current_doc: Option<DocId>,
    current_position: u32,
}

impl FieldData {
    pub fn new(name: impl Into<String>, features: FieldFeatures) -> Self {
        FieldData {
            name: name.into(),
            features,
            terms: HashMap::new(),
            current_doc: None,
            current_position: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features(&self) -> FieldFeatures {
        self.features
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Registers one token occurrence for `doc_id`. `doc_id` must be
    /// monotonically non-decreasing across calls for this `FieldData` —
    /// the caller (`SegmentWriter::insert`) guarantees this since it feeds
    /// one document's tokens at a time in ascending `doc_id` order.
    ///
    /// `position_increment` is relative to the *field's* token stream, not
    /// to this term's own prior occurrences — two tokens of the same term
    /// are rarely adjacent, so the running counter lives here rather than
    /// on the per-term accumulator. It resets to zero whenever `doc_id`
    /// changes.
    pub fn add_token(
        &mut self,
        doc_id: DocId,
        term_bytes: &[u8],
        position_increment: u32,
        offset: (u32, u32),
        payload: Option<&[u8]>,
    ) -> Result<(), IndexError> {
        if !doc_id.is_valid() {
            return Err(IndexError::Index(format!(
                "field {:?}: cannot index invalid doc_id",
                self.name
            )));
        }
        if self.current_doc != Some(doc_id) {
            self.current_doc = Some(doc_id);
            self.current_position = 0;
        } else {
            self.current_position += position_increment.max(1);
        }
        let position = self.current_position;
        let postings = self
            .terms
            .entry(term_bytes.to_vec())
            .or_insert_with(|| TermPostings::new(self.features));
        postings.add_occurrence(doc_id, position, offset, payload);
        Ok(())
    }

    /// Flushes every term's still-open block. Must be called once, after
    /// the last document for this field has been processed and before
    /// [`FieldData::terms_in_dictionary_order`] is consulted.
    pub fn finish(&mut self) {
        for postings in self.terms.values_mut() {
            postings.finish();
        }
    }

    /// Terms in byte-lexicographic dictionary order, as the codec requires
    /// when flushing a segment.
    pub fn terms_in_dictionary_order(&self) -> Vec<(&[u8], &TermPostings)> {
        let mut entries: Vec<(&[u8], &TermPostings)> =
            self.terms.iter().map(|(k, v)| (k.as_slice(), v)).collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Flushes this field's postings to the segment codec: terms in
    /// dictionary order, each term's posting bytes followed by its own
    /// skip-list trailer, driving the skip writer once per document
    /// boundary.
    ///
    /// `dict_out` receives one record per term: term bytes, document
    /// frequency, total term frequency, first `doc_id`, the term's byte
    /// offset into `postings_out`, the length of its posting bytes proper,
    /// and the length of its skip-list trailer (the two are kept separate
    /// so a reader knows exactly where postings end and the trailer
    /// begins, rather than re-deriving it by decoding blocks). `max_levels`
    /// bounds how many skip levels a single term's posting list may use,
    /// matching [`SkipWriter::prepare`].
    pub fn write_postings(
        &self,
        skip_0: usize,
        skip_n: usize,
        max_levels: usize,
        postings_out: &mut Vec<u8>,
        dict_out: &mut Vec<u8>,
    ) -> io::Result<()> {
        write_term_dictionary(
            skip_0,
            skip_n,
            max_levels,
            self.terms_in_dictionary_order().into_iter(),
            self.terms.len(),
            postings_out,
            dict_out,
        )
    }
}

/// Writes a term dictionary plus its postings, shared by
/// [`FieldData::write_postings`] (driven from a segment writer's in-memory
/// term map) and [`crate::merge_writer::MergeWriter`] (driven from a
/// k-way merge of several segments' term dictionaries). `terms` must
/// already be in byte-lexicographic dictionary order.
pub fn write_term_dictionary<'a>(
    skip_0: usize,
    skip_n: usize,
    max_levels: usize,
    terms: impl Iterator<Item = (&'a [u8], &'a TermPostings)>,
    term_count: usize,
    postings_out: &mut Vec<u8>,
    dict_out: &mut Vec<u8>,
) -> io::Result<()> {
    write_varlong(dict_out, term_count as u64)?;
    for (term_bytes, postings) in terms {
        let postings_offset = postings_out.len() as u64;
        postings_out.extend_from_slice(postings.block_stream());
        let postings_length = postings_out.len() as u64 - postings_offset;

        let mut skip_writer = SkipWriter::new(skip_0, skip_n);
        skip_writer.prepare(max_levels, postings.doc_boundaries().len());
        for &(doc_id, offset) in postings.doc_boundaries() {
            skip_writer.skip(doc_id.0, offset)?;
        }
        let trailer_start = postings_out.len() as u64;
        skip_writer.flush(postings_out)?;
        let trailer_length = postings_out.len() as u64 - trailer_start;

        write_bytes(dict_out, term_bytes)?;
        write_varlong(dict_out, postings.doc_frequency() as u64)?;
        write_varlong(dict_out, postings.total_term_frequency())?;
        write_varlong(dict_out, postings.first_doc().map_or(0, |d| d.0) as u64)?;
        write_varlong(dict_out, postings_offset)?;
        write_varlong(dict_out, postings_length)?;
        write_varlong(dict_out, trailer_length)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_are_iterated_in_dictionary_order() {
        let mut field = FieldData::new("body", FieldFeatures::frequency());
        field.add_token(DocId(1), b"zebra", 1, (0, 5), None).unwrap();
        field.add_token(DocId(1), b"apple", 1, (6, 11), None).unwrap();
        field.add_token(DocId(2), b"mango", 1, (0, 5), None).unwrap();
        field.finish();

        let names: Vec<&[u8]> = field
            .terms_in_dictionary_order()
            .into_iter()
            .map(|(term, _)| term)
            .collect();
        assert_eq!(names, vec![b"apple".as_slice(), b"mango", b"zebra"]);
    }

    #[test]
    fn rejects_invalid_doc_id() {
        let mut field = FieldData::new("body", FieldFeatures::frequency());
        assert!(field
            .add_token(DocId::INVALID, b"term", 1, (0, 4), None)
            .is_err());
    }

    #[test]
    fn write_postings_emits_one_dict_record_per_term() {
        let mut field = FieldData::new("body", FieldFeatures::frequency());
        for doc in 1u32..=20 {
            field.add_token(DocId(doc), b"common", 1, (0, 6), None).unwrap();
        }
        field.add_token(DocId(5), b"rare", 1, (0, 4), None).unwrap();
        field.finish();

        let mut postings = Vec::new();
        let mut dict = Vec::new();
        field.write_postings(4, 4, 4, &mut postings, &mut dict).unwrap();

        let mut cursor = std::io::Cursor::new(dict);
        let term_count = common::varint::read_varlong(&mut cursor).unwrap();
        assert_eq!(term_count, 2);

        let first_term = common::varint::read_bytes(&mut cursor).unwrap();
        assert_eq!(first_term, b"common");
        let doc_frequency = common::varint::read_varlong(&mut cursor).unwrap();
        assert_eq!(doc_frequency, 20);
    }
}
