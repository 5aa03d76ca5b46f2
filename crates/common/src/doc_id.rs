//! Segment-local document identifiers.
//!
//! `doc_id`s are assigned monotonically within a single segment, starting at
//! [`DocId::MIN`]. `0` is never a valid id and [`DocId::EOF`] is a
//! distinguished maximum used by iterators to signal exhaustion. Global
//! document identity is always `(segment, local_id)`; nothing in this crate
//! compares `doc_id`s across segments.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(pub u32);

impl DocId {
    /// `0` is reserved and never assigned to a document.
    pub const INVALID: DocId = DocId(0);
    /// The first id assigned within a segment.
    pub const MIN: DocId = DocId(1);
    /// Sentinel returned by iterators once exhausted.
    pub const EOF: DocId = DocId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != DocId::INVALID && self != DocId::EOF
    }

    pub fn next(self) -> DocId {
        DocId(self.0 + 1)
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DocId::INVALID => write!(f, "DocId(invalid)"),
            DocId::EOF => write!(f, "DocId(eof)"),
            DocId(n) => write!(f, "DocId({n})"),
        }
    }
}

impl From<u32> for DocId {
    fn from(value: u32) -> Self {
        DocId(value)
    }
}

impl From<DocId> for u32 {
    fn from(value: DocId) -> Self {
        value.0
    }
}

/// `(generation, update_id)` pair the index writer uses to reconcile
/// upsert semantics across segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct UpdateContext {
    pub generation: u64,
    pub update_id: u64,
}
