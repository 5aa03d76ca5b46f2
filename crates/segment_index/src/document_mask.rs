//! Document mask: the set of `doc_id`s within one segment that must not
//! be visible to readers — either because indexing them partially failed
//! or because they were deleted/replaced by a later update.
//!
//! `doc_id`s are dense and contiguous within a segment (`1..=doc_count`),
//! so a dense bitset with a live-count cache gives O(1) membership and a
//! compact on-disk form, in the style of a `DeletedBitset` rather than a
//! hash set of ids (see DESIGN.md for the tradeoff).

use std::io;

use bitvec::{
    bitvec,
    vec::BitVec,
};
use common::{
    doc_id::DocId,
    varint::{
        read_varlong,
        write_varlong,
    },
};

#[derive(Clone, Debug)]
pub struct DocumentMask {
    masked: BitVec,
    masked_count: u64,
}

impl DocumentMask {
    /// `capacity` should be at least the number of documents the segment
    /// will ever hold; the mask grows on demand if it isn't.
    pub fn new(capacity: usize) -> Self {
        DocumentMask {
            masked: bitvec![0; capacity],
            masked_count: 0,
        }
    }

    fn index_of(doc_id: DocId) -> usize {
        debug_assert!(doc_id.is_valid(), "cannot mask the invalid doc_id sentinel");
        (doc_id.0 - DocId::MIN.0) as usize
    }

    /// Marks `doc_id` as masked. Idempotent.
    pub fn mask(&mut self, doc_id: DocId) {
        let index = Self::index_of(doc_id);
        if index >= self.masked.len() {
            self.masked.resize(index + 1, false);
        }
        if !self.masked.replace(index, true) {
            self.masked_count += 1;
        }
    }

    pub fn is_masked(&self, doc_id: DocId) -> bool {
        let index = Self::index_of(doc_id);
        self.masked.get(index).map_or(false, |bit| *bit)
    }

    pub fn masked_count(&self) -> u64 {
        self.masked_count
    }

    pub fn live_count(&self, doc_count: u64) -> u64 {
        doc_count.saturating_sub(self.masked_count)
    }

    /// Iterates every masked `doc_id`, in ascending order.
    pub fn iter_masked(&self) -> impl Iterator<Item = DocId> + '_ {
        self.masked.iter_ones().map(|index| DocId(index as u32 + DocId::MIN.0))
    }

    pub fn encode(&self, out: &mut dyn io::Write) -> io::Result<()> {
        write_varlong(out, self.masked_count)?;
        for doc_id in self.iter_masked() {
            write_varlong(out, doc_id.0 as u64)?;
        }
        Ok(())
    }

    pub fn decode(input: &mut dyn io::Read, capacity: usize) -> io::Result<Self> {
        let count = read_varlong(input)?;
        let mut mask = DocumentMask::new(capacity);
        for _ in 0..count {
            let doc_id = DocId(read_varlong(input)? as u32);
            mask.mask(doc_id);
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn mask_is_idempotent() {
        let mut mask = DocumentMask::new(8);
        mask.mask(DocId(3));
        mask.mask(DocId(3));
        assert_eq!(mask.masked_count(), 1);
        assert!(mask.is_masked(DocId(3)));
        assert!(!mask.is_masked(DocId(4)));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut mask = DocumentMask::new(16);
        mask.mask(DocId(2));
        mask.mask(DocId(9));
        let mut buf = Vec::new();
        mask.encode(&mut buf).unwrap();

        let decoded = DocumentMask::decode(&mut Cursor::new(buf), 16).unwrap();
        assert_eq!(decoded.masked_count(), 2);
        assert!(decoded.is_masked(DocId(2)));
        assert!(decoded.is_masked(DocId(9)));
        assert!(!decoded.is_masked(DocId(5)));
    }

    #[test]
    fn live_count_subtracts_masked() {
        let mut mask = DocumentMask::new(8);
        mask.mask(DocId(1));
        assert_eq!(mask.live_count(5), 4);
    }
}
