//! Field sources: the shape a caller hands to [`crate::segment_writer::SegmentWriter::insert`].
//!
//! Modeled as a trait object rather than a generic parameter threaded
//! through the writer, so a `Document` is simply `Vec<Box<dyn
//! FieldSource>>` and callers can mix field implementations freely within
//! one document.

use common::analyzer::Analyzer;

use crate::posting::FieldFeatures;

/// One field of one document, ready to be indexed and/or stored.
///
/// `value()` is analyzed (if `features().indexed` via [`FieldSource::indexed`])
/// and/or copied verbatim into the column store (if [`FieldSource::stored`]).
/// A field may be both, either, or neither (a field that is neither
/// contributes nothing and `SegmentWriter` skips it).
pub trait FieldSource: Send + Sync {
    fn name(&self) -> &str;
    fn indexed(&self) -> bool;
    fn stored(&self) -> bool;
    fn features(&self) -> FieldFeatures;
    fn value(&self) -> &[u8];

    /// The analyzer used to tokenize [`FieldSource::value`]. Only consulted
    /// when `indexed()` is true.
    fn analyzer(&self) -> &dyn Analyzer;
}

/// A document is an ordered bag of fields; order is not significant to the
/// writer (fields are re-sorted by name at flush time) but is preserved
/// here since callers often want it for stored-field round-tripping.
pub type Document = Vec<Box<dyn FieldSource>>;

/// Reference [`FieldSource`] good enough to drive the write path in tests
/// and the ingestion binary: a plain concrete struct alongside the
/// trait-object interface the writer actually consumes.
pub struct SimpleField<A: Analyzer> {
    name: String,
    indexed: bool,
    stored: bool,
    features: FieldFeatures,
    value: Vec<u8>,
    analyzer: A,
}

impl<A: Analyzer> SimpleField<A> {
    pub fn new(
        name: impl Into<String>,
        indexed: bool,
        stored: bool,
        features: FieldFeatures,
        value: impl Into<Vec<u8>>,
        analyzer: A,
    ) -> Self {
        SimpleField {
            name: name.into(),
            indexed,
            stored,
            features,
            value: value.into(),
            analyzer,
        }
    }
}

impl<A: Analyzer + Send + Sync> FieldSource for SimpleField<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn indexed(&self) -> bool {
        self.indexed
    }

    fn stored(&self) -> bool {
        self.stored
    }

    fn features(&self) -> FieldFeatures {
        self.features
    }

    fn value(&self) -> &[u8] {
        &self.value
    }

    fn analyzer(&self) -> &dyn Analyzer {
        &self.analyzer
    }
}

#[cfg(test)]
mod tests {
    use common::analyzer::WhitespaceAnalyzer;

    use super::*;

    #[test]
    fn simple_field_exposes_its_value() {
        let field = SimpleField::new(
            "body",
            true,
            true,
            FieldFeatures::positions(),
            b"hello world".to_vec(),
            WhitespaceAnalyzer,
        );
        assert_eq!(field.name(), "body");
        assert!(field.indexed());
        assert!(field.stored());
        assert_eq!(field.value(), b"hello world");
    }
}
