//! Shared primitives used by the rest of the workspace: the on-disk byte
//! encoding helpers, the `Directory` and `Analyzer` consumed interfaces, the
//! document identifier type, and the crate-wide error taxonomy.

pub mod analyzer;
pub mod directory;
pub mod doc_id;
pub mod errors;
pub mod varint;

pub use crate::{
    analyzer::{
        Analyzer,
        TokenStream,
        Utf8WordAnalyzer,
        WhitespaceAnalyzer,
    },
    directory::{
        Directory,
        FsDirectory,
        InputStream,
        OutputStream,
        RamDirectory,
    },
    doc_id::DocId,
    errors::IndexError,
};
