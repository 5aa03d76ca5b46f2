//! Error taxonomy for the segmented write path.
//!
//! Leaf functions and crate-public boundaries alike return
//! `Result<T, IndexError>` for the fatal kinds called out in the design
//! (format errors, I/O errors, logical index errors, analyzer errors, and
//! resource exhaustion) — a single enum rather than a `thiserror` leaf
//! wrapped in `anyhow` at the boundary, since this workspace's library
//! crates have no further context to attach beyond what `IndexError`
//! already carries. `anyhow::Result` is used by `bin/ingest.rs`, the one
//! binary in the workspace, where `.context(..)` on each CLI step is
//! genuinely useful.
//!
//! Partial-insert failures are deliberately *not* a variant here: per the
//! design, a field or attribute write returning `false` is swallowed into
//! the document mask and surfaced as a `bool`, not propagated as an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed on-disk bytes: a zero-length skip level, a bad checksum,
    /// a version mismatch, or any other violation of the format's layered
    /// encoding.
    #[error("format error in {context}: {detail}")]
    Format { context: String, detail: String },

    /// A directory operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A logical invariant was violated while reading back an index, e.g.
    /// non-monotonic `doc_id`s in a posting list.
    #[error("index invariant violated: {0}")]
    Index(String),

    /// The analyzer's `reset` call failed for a field's value.
    #[error("analyzer error on field {field:?}: {detail}")]
    Analyzer { field: String, detail: String },

    /// The operation could not make progress because a resource limit
    /// (memory, descriptor count, ...) was exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl IndexError {
    pub fn format(context: impl Into<String>, detail: impl Into<String>) -> Self {
        IndexError::Format {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub fn analyzer(field: impl Into<String>, detail: impl Into<String>) -> Self {
        IndexError::Analyzer {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error kind is recoverable by masking the offending
    /// document rather than aborting the whole segment.
    pub fn is_document_local(&self) -> bool {
        matches!(self, IndexError::Analyzer { .. })
    }
}
