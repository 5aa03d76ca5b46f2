//! Posting accumulator (component B): per-term in-memory state built up
//! while a segment is being written — first/last `doc_id` seen, the
//! document frequency, the total term frequency, and the already-encoded
//! stream of per-document blocks (positions/offsets/payloads, gated by the
//! field's declared features).
//!
//! Blocks are encoded eagerly as each document finishes rather than kept
//! as a parallel `Vec<(DocId, u32, Vec<u32>)>`, since the encoded bytes are
//! exactly what gets copied into the segment's posting file at flush time
//! — this is the "pointer to its backing buffer" the design calls out.

use common::{
    doc_id::DocId,
    varint::{
        write_bytes,
        write_varint,
    },
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldFeatures {
    pub frequency: bool,
    pub position: bool,
    pub offset: bool,
    pub payload: bool,
    pub norm: bool,
}

impl FieldFeatures {
    pub const NONE: FieldFeatures = FieldFeatures {
        frequency: false,
        position: false,
        offset: false,
        payload: false,
        norm: false,
    };

    pub fn frequency() -> Self {
        FieldFeatures {
            frequency: true,
            ..FieldFeatures::NONE
        }
    }

    pub fn positions() -> Self {
        FieldFeatures {
            frequency: true,
            position: true,
            ..FieldFeatures::NONE
        }
    }

    pub fn all() -> Self {
        FieldFeatures {
            frequency: true,
            position: true,
            offset: true,
            payload: true,
            norm: true,
        }
    }

    /// Packs the feature flags into a single byte for the segment's field
    /// schema file.
    pub fn to_bits(self) -> u8 {
        (self.frequency as u8)
            | (self.position as u8) << 1
            | (self.offset as u8) << 2
            | (self.payload as u8) << 3
            | (self.norm as u8) << 4
    }

    pub fn from_bits(bits: u8) -> Self {
        FieldFeatures {
            frequency: bits & 0x01 != 0,
            position: bits & 0x02 != 0,
            offset: bits & 0x04 != 0,
            payload: bits & 0x08 != 0,
            norm: bits & 0x10 != 0,
        }
    }
}

/// Per-`(field, term)` accumulator. `doc_id`s seen across its lifetime are
/// strictly ascending by construction: a new block is only opened when the
/// incoming `doc_id` differs from the one currently being built, and
/// `SegmentWriter` only ever calls `add_occurrence` with monotonically
/// increasing `doc_id`s within one field.
pub struct TermPostings {
    features: FieldFeatures,
    first_doc: Option<DocId>,
    last_written_doc: DocId,
    doc_frequency: u32,
    total_term_frequency: u64,
    block_stream: Vec<u8>,
    doc_boundaries: Vec<(DocId, u64)>,

    pending_doc: Option<DocId>,
    pending_freq: u32,
    pending_positions: Vec<u32>,
    pending_offsets: Vec<(u32, u32)>,
    pending_payloads: Vec<Option<Vec<u8>>>,
}

impl TermPostings {
    pub fn new(features: FieldFeatures) -> Self {
        TermPostings {
            features,
            first_doc: None,
            last_written_doc: DocId::INVALID,
            doc_frequency: 0,
            total_term_frequency: 0,
            block_stream: Vec::new(),
            doc_boundaries: Vec::new(),
            pending_doc: None,
            pending_freq: 0,
            pending_positions: Vec::new(),
            pending_offsets: Vec::new(),
            pending_payloads: Vec::new(),
        }
    }

    pub fn first_doc(&self) -> Option<DocId> {
        self.first_doc
    }

    pub fn doc_frequency(&self) -> u32 {
        self.doc_frequency
    }

    pub fn total_term_frequency(&self) -> u64 {
        self.total_term_frequency
    }

    /// Bytes accumulated so far, including the still-open document's block
    /// only after [`TermPostings::finish`] has been called.
    pub fn block_stream(&self) -> &[u8] {
        &self.block_stream
    }

    /// `(doc_id, byte_offset_into_block_stream)` for the start of every
    /// finished block, in the order they were written. The segment codec
    /// walks this to decide when to call into the skip writer, instead of
    /// re-deriving offsets by re-scanning the encoded bytes.
    pub fn doc_boundaries(&self) -> &[(DocId, u64)] {
        &self.doc_boundaries
    }

    /// Registers one occurrence of this term at `doc_id`, at the given
    /// absolute position within the document's token stream (already
    /// resolved against the *field's* running position counter, shared
    /// across every term of the document — a term's own occurrences are
    /// usually not contiguous in the stream, so this accumulator cannot
    /// derive position from its own occurrence count), plus a byte offset
    /// and optional payload (all ignored if the field's features don't
    /// call for them). Starts a new block if `doc_id` differs from the
    /// document currently being accumulated, flushing the previous block
    /// first.
    pub fn add_occurrence(
        &mut self,
        doc_id: DocId,
        position: u32,
        offset: (u32, u32),
        payload: Option<&[u8]>,
    ) {
        if self.pending_doc != Some(doc_id) {
            self.flush_pending();
            self.pending_doc = Some(doc_id);
            self.pending_freq = 0;
            self.pending_positions.clear();
            self.pending_offsets.clear();
            self.pending_payloads.clear();
            if self.first_doc.is_none() {
                self.first_doc = Some(doc_id);
            }
            self.doc_frequency += 1;
        }
        self.pending_freq += 1;
        self.total_term_frequency += 1;
        if self.features.position {
            self.pending_positions.push(position);
        }
        if self.features.offset {
            self.pending_offsets.push(offset);
        }
        if self.features.payload {
            self.pending_payloads.push(payload.map(|p| p.to_vec()));
        }
    }

    /// Flushes whatever document is currently pending. Idempotent: safe to
    /// call on flush even if no occurrences were ever recorded.
    pub fn finish(&mut self) {
        self.flush_pending();
    }

    fn flush_pending(&mut self) {
        let Some(doc_id) = self.pending_doc.take() else {
            return;
        };
        self.doc_boundaries.push((doc_id, self.block_stream.len() as u64));
        let delta = doc_id.0 - self.last_written_doc.0;
        write_varint(&mut self.block_stream, delta).expect("writing to a Vec<u8> cannot fail");
        if self.features.frequency {
            write_varint(&mut self.block_stream, self.pending_freq)
                .expect("writing to a Vec<u8> cannot fail");
        }
        if self.features.position {
            for &pos in &self.pending_positions {
                write_varint(&mut self.block_stream, pos).expect("writing to a Vec<u8> cannot fail");
            }
        }
        if self.features.offset {
            for &(start, end) in &self.pending_offsets {
                write_varint(&mut self.block_stream, start).expect("writing to a Vec<u8> cannot fail");
                write_varint(&mut self.block_stream, end - start)
                    .expect("writing to a Vec<u8> cannot fail");
            }
        }
        if self.features.payload {
            for payload in &self.pending_payloads {
                write_bytes(&mut self.block_stream, payload.as_deref().unwrap_or(&[]))
                    .expect("writing to a Vec<u8> cannot fail");
            }
        }
        self.last_written_doc = doc_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_bits_roundtrip() {
        for features in [
            FieldFeatures::NONE,
            FieldFeatures::frequency(),
            FieldFeatures::positions(),
            FieldFeatures::all(),
        ] {
            assert_eq!(FieldFeatures::from_bits(features.to_bits()), features);
        }
    }

    #[test]
    fn single_document_frequency_matches_occurrence_count() {
        let mut postings = TermPostings::new(FieldFeatures::positions());
        postings.add_occurrence(DocId(1), 1, (0, 1), None);
        postings.add_occurrence(DocId(1), 1, (2, 3), None);
        postings.finish();

        assert_eq!(postings.doc_frequency(), 1);
        assert_eq!(postings.total_term_frequency(), 2);
        assert_eq!(postings.first_doc(), Some(DocId(1)));
    }

    #[test]
    fn new_document_starts_a_new_block() {
        let mut postings = TermPostings::new(FieldFeatures::frequency());
        postings.add_occurrence(DocId(1), 1, (0, 0), None);
        postings.add_occurrence(DocId(3), 1, (0, 0), None);
        postings.finish();

        assert_eq!(postings.doc_frequency(), 2);
        assert_eq!(postings.total_term_frequency(), 2);
    }
}
