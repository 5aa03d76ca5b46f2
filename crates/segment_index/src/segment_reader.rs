//! Segment reader: the narrow produced interface a flushed segment
//! exposes back to the write path itself — [`crate::merge_writer::MergeWriter`]
//! is the only consumer inside this crate, since query-side iteration is
//! consumed elsewhere, not implemented here. What's modeled is just
//! enough to walk a field's term dictionary in order and decode its
//! postings, plus read back stored columns and the document mask.

use std::{
    io::{
        self,
        Seek,
        SeekFrom,
    },
    sync::Arc,
};

use common::{
    directory::{
        Directory,
        InputStream,
    },
    doc_id::DocId,
    varint::{
        read_bytes,
        read_varlong,
        read_varlong as read_varint_u32_as_u64,
    },
};
use once_cell::sync::Lazy;

use crate::{
    column::ColumnReader,
    document_mask::DocumentMask,
    posting::FieldFeatures,
    segment_meta::SegmentMeta,
    skip::SkipReader,
};

#[derive(Clone, Debug)]
pub struct TermEntry {
    pub term: Vec<u8>,
    pub doc_frequency: u64,
    pub total_term_frequency: u64,
    pub first_doc: DocId,
    postings_offset: u64,
    postings_length: u64,
    trailer_length: u64,
}

/// A field's term dictionary loaded into memory, plus a handle on the
/// shared postings file each term's entry points into.
pub struct TermDictReader {
    terms: Vec<TermEntry>,
    postings: Box<dyn InputStream>,
    skip_0: usize,
    skip_n: usize,
}

impl TermDictReader {
    /// Terms in dictionary (byte-lexicographic) order, exactly as written
    /// by `FieldData::write_postings`.
    pub fn terms(&self) -> &[TermEntry] {
        &self.terms
    }

    pub fn find(&self, term: &[u8]) -> Option<&TermEntry> {
        self.terms
            .binary_search_by(|entry| entry.term.as_slice().cmp(term))
            .ok()
            .map(|index| &self.terms[index])
    }

    /// Opens a posting iterator over `entry`, honoring `features` to
    /// decide which optional fields to decode.
    pub fn postings(&self, entry: &TermEntry, features: FieldFeatures) -> io::Result<PostingsIterator> {
        let mut stream = self.postings.dup()?;
        stream.seek(SeekFrom::Start(entry.postings_offset))?;
        let skip_reader = if entry.trailer_length > 0 {
            let mut trailer_stream = self.postings.dup()?;
            trailer_stream.seek(SeekFrom::Start(
                entry.postings_offset + entry.postings_length,
            ))?;
            let mut reader = SkipReader::new(self.skip_0, self.skip_n);
            reader.prepare(trailer_stream)?;
            Some(reader)
        } else {
            None
        };
        Ok(PostingsIterator {
            stream,
            remaining: entry.postings_length,
            features,
            current_doc: DocId::INVALID,
            current_freq: 0,
            current_positions: Vec::new(),
            current_offsets: Vec::new(),
            current_payloads: Vec::new(),
            _skip_reader: skip_reader,
        })
    }
}

/// Decodes the block stream written by `TermPostings::flush_pending`:
/// `varint(doc_delta)`, then `varint(freq)`/positions/offsets/payloads per
/// the field's declared features, repeated until `remaining` bytes of the
/// term's posting region are consumed.
pub struct PostingsIterator {
    stream: Box<dyn InputStream>,
    remaining: u64,
    features: FieldFeatures,
    current_doc: DocId,
    current_freq: u32,
    current_positions: Vec<u32>,
    current_offsets: Vec<(u32, u32)>,
    current_payloads: Vec<Option<Vec<u8>>>,
    _skip_reader: Option<SkipReader>,
}

impl PostingsIterator {
    pub fn doc(&self) -> DocId {
        self.current_doc
    }

    pub fn freq(&self) -> u32 {
        self.current_freq
    }

    /// Absolute, strictly ascending positions for the current document
    /// (empty unless the field's features include `position`).
    pub fn positions(&self) -> &[u32] {
        &self.current_positions
    }

    /// Byte `[start, end)` offsets per occurrence in the current document
    /// (empty unless the field's features include `offset`).
    pub fn offsets(&self) -> &[(u32, u32)] {
        &self.current_offsets
    }

    /// Optional payload per occurrence in the current document (empty
    /// unless the field's features include `payload`).
    pub fn payloads(&self) -> &[Option<Vec<u8>>] {
        &self.current_payloads
    }

    /// Advances to the next document in the posting list, returning its
    /// `doc_id` and term frequency, or `None` once the term's posting
    /// bytes are exhausted. Also decodes positions/offsets/payloads (if
    /// the field's features call for them) into
    /// [`PostingsIterator::positions`]/[`PostingsIterator::offsets`]/
    /// [`PostingsIterator::payloads`], which the merge writer needs to
    /// copy occurrences into a new posting list verbatim.
    pub fn advance(&mut self) -> io::Result<Option<(DocId, u32)>> {
        self.current_positions.clear();
        self.current_offsets.clear();
        self.current_payloads.clear();
        if self.remaining == 0 {
            self.current_doc = DocId::EOF;
            self.current_freq = 0;
            return Ok(None);
        }
        let before = self.stream.file_pointer()?;
        let delta = read_varint_u32_as_u64(&mut self.stream)? as u32;
        self.current_doc = DocId(self.current_doc.0 + delta);
        let freq = if self.features.frequency {
            read_varlong(&mut self.stream)? as u32
        } else {
            1
        };
        self.current_freq = freq;
        if self.features.position {
            self.current_positions.reserve(freq as usize);
            for _ in 0..freq {
                self.current_positions.push(read_varlong(&mut self.stream)? as u32);
            }
        }
        if self.features.offset {
            self.current_offsets.reserve(freq as usize);
            for _ in 0..freq {
                let start = read_varlong(&mut self.stream)? as u32;
                let len = read_varlong(&mut self.stream)? as u32;
                self.current_offsets.push((start, start + len));
            }
        }
        if self.features.payload {
            self.current_payloads.reserve(freq as usize);
            for _ in 0..freq {
                let bytes = read_bytes(&mut self.stream)?;
                self.current_payloads.push(if bytes.is_empty() { None } else { Some(bytes) });
            }
        }
        let after = self.stream.file_pointer()?;
        self.remaining = self.remaining.saturating_sub(after - before);
        Ok(Some((self.current_doc, freq)))
    }
}

/// Process-wide empty postings singleton, returned by
/// [`SegmentReader::open_postings_or_empty`] when a term genuinely has no
/// occurrences to iterate (e.g. a field with zero documents). Mirrors the
/// capability-trait "empty iterator" pattern used elsewhere in the write
/// path (design notes §9) without allocating a fresh empty stream per call.
static EMPTY_TERM_ENTRIES: Lazy<Vec<TermEntry>> = Lazy::new(Vec::new);

pub struct SegmentReader {
    directory: Arc<dyn Directory>,
    pub meta: SegmentMeta,
    mask: DocumentMask,
}

impl SegmentReader {
    pub fn open(directory: Arc<dyn Directory>, meta: SegmentMeta, skip_0: usize, skip_n: usize) -> io::Result<Self> {
        let _ = (skip_0, skip_n); // kept for symmetry with open_term_reader's signature
        let mask_file = meta
            .files
            .iter()
            .find(|f| f.ends_with(".mask"))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "segment meta has no mask file"))?;
        let mut input = directory.open(mask_file)?;
        let mask = DocumentMask::decode(&mut input, meta.doc_count as usize)?;
        Ok(SegmentReader {
            directory,
            meta,
            mask,
        })
    }

    pub fn doc_count(&self) -> u64 {
        self.meta.doc_count
    }

    pub fn live_count(&self) -> u64 {
        self.mask.live_count(self.meta.doc_count)
    }

    pub fn is_live(&self, doc_id: DocId) -> bool {
        doc_id.is_valid() && doc_id.0 <= DocId::MIN.0 + self.meta.doc_count as u32 - 1 && !self.mask.is_masked(doc_id)
    }

    /// Live `doc_id`s in ascending order.
    pub fn live_doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        let upper = DocId::MIN.0 + self.meta.doc_count as u32;
        (DocId::MIN.0..upper).map(DocId).filter(move |d| !self.mask.is_masked(*d))
    }

    /// The indexed-field schema persisted by `SegmentWriter::flush`:
    /// field name to the `FieldFeatures` it was written with. Empty if the
    /// segment indexed no fields at all.
    pub fn field_schema(&self) -> io::Result<std::collections::HashMap<String, FieldFeatures>> {
        let schema_file = format!("{}.fields", self.meta.name);
        if !self.directory.exists(&schema_file)? {
            return Ok(std::collections::HashMap::new());
        }
        let mut input = self.directory.open(&schema_file)?;
        let count = read_varlong(&mut input)? as usize;
        let mut schema = std::collections::HashMap::with_capacity(count);
        for _ in 0..count {
            let name = common::varint::read_string(&mut input)?;
            let bits = common::varint::read_u8(&mut input)?;
            schema.insert(name, FieldFeatures::from_bits(bits));
        }
        Ok(schema)
    }

    /// Stored-column names persisted by `SegmentWriter::flush`. Distinct
    /// from `field_schema` since a field can be stored without being
    /// indexed, or vice versa.
    pub fn stored_field_names(&self) -> io::Result<Vec<String>> {
        let columns_file = format!("{}.columns", self.meta.name);
        if !self.directory.exists(&columns_file)? {
            return Ok(Vec::new());
        }
        let mut input = self.directory.open(&columns_file)?;
        let count = read_varlong(&mut input)? as usize;
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(common::varint::read_string(&mut input)?);
        }
        Ok(names)
    }

    pub fn field(&self, name: &str) -> io::Result<bool> {
        Ok(self.field_schema()?.contains_key(name))
    }

    pub fn open_term_reader(&self, field_name: &str, skip_0: usize, skip_n: usize) -> io::Result<Option<TermDictReader>> {
        let dict_file = format!("{}.{field_name}.dict", self.meta.name);
        let postings_file = format!("{}.{field_name}.postings", self.meta.name);
        if !self.directory.exists(&dict_file)? {
            return Ok(None);
        }
        let mut dict_input = self.directory.open(&dict_file)?;
        let term_count = read_varlong(&mut dict_input)? as usize;
        let mut terms = Vec::with_capacity(term_count);
        for _ in 0..term_count {
            let term = read_bytes(&mut dict_input)?;
            let doc_frequency = read_varlong(&mut dict_input)?;
            let total_term_frequency = read_varlong(&mut dict_input)?;
            let first_doc = DocId(read_varlong(&mut dict_input)? as u32);
            let postings_offset = read_varlong(&mut dict_input)?;
            let postings_length = read_varlong(&mut dict_input)?;
            let trailer_length = read_varlong(&mut dict_input)?;
            terms.push(TermEntry {
                term,
                doc_frequency,
                total_term_frequency,
                first_doc,
                postings_offset,
                postings_length,
                trailer_length,
            });
        }
        let postings = self.directory.open(&postings_file)?;
        Ok(Some(TermDictReader {
            terms,
            postings,
            skip_0,
            skip_n,
        }))
    }

    pub fn open_column_reader(&self, field_name: &str) -> io::Result<Option<ColumnReader>> {
        let values_file = format!("{}.{field_name}.values", self.meta.name);
        let index_file = format!("{}.{field_name}.index", self.meta.name);
        if !self.directory.exists(&values_file)? {
            return Ok(None);
        }
        let values = self.directory.open(&values_file)?;
        let mut index_input = self.directory.open(&index_file)?;
        Ok(Some(ColumnReader::open(values, &mut index_input)?))
    }
}

pub fn empty_term_entries() -> &'static [TermEntry] {
    &EMPTY_TERM_ENTRIES
}

#[cfg(test)]
mod tests {
    use common::{
        analyzer::WhitespaceAnalyzer,
        directory::RamDirectory,
        doc_id::UpdateContext,
    };

    use super::*;
    use crate::{
        field::{
            Document,
            SimpleField,
        },
        segment_writer::{
            SegmentWriter,
            SegmentWriterConfig,
        },
    };

    #[test]
    fn reads_back_what_the_writer_flushed() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let mut writer = SegmentWriter::new(dir.clone(), "_0", SegmentWriterConfig::default());
        for (i, text) in ["the quick fox", "the lazy dog", "the fox sleeps"].iter().enumerate() {
            let fields: Document = vec![Box::new(SimpleField::new(
                "body",
                true,
                true,
                FieldFeatures::positions(),
                text.as_bytes().to_vec(),
                WhitespaceAnalyzer,
            ))];
            writer.insert(
                &fields,
                UpdateContext {
                    generation: 0,
                    update_id: i as u64,
                },
            );
        }
        let meta = writer.flush().unwrap().unwrap();

        let reader = SegmentReader::open(dir, meta, 8, 8).unwrap();
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(reader.live_count(), 3);
        assert!(reader.field("body").unwrap());

        let term_reader = reader.open_term_reader("body", 8, 8).unwrap().unwrap();
        let the_entry = term_reader.find(b"the").expect("'the' appears in every doc");
        assert_eq!(the_entry.doc_frequency, 3);

        let mut postings = term_reader.postings(the_entry, FieldFeatures::positions()).unwrap();
        let mut docs = Vec::new();
        while let Some((doc_id, _freq)) = postings.advance().unwrap() {
            docs.push(doc_id.0);
        }
        assert_eq!(docs, vec![1, 2, 3]);
    }
}
