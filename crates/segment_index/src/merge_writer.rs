//! Merge writer (component F): consolidates several segment readers into
//! one new segment, preserving document identity by remapping every live
//! `doc_id` into a dense, contiguous range and dropping masked documents.

use std::{
    cmp::Ordering,
    collections::{
        BinaryHeap,
        HashMap,
    },
    sync::Arc,
};

use common::{
    directory::Directory,
    doc_id::DocId,
    errors::IndexError,
    varint::{
        write_string,
        write_u8,
        write_varlong,
    },
};
use tracing::instrument;

use crate::{
    column::ColumnWriter,
    document_mask::DocumentMask,
    field_data::write_term_dictionary,
    posting::{
        FieldFeatures,
        TermPostings,
    },
    segment_meta::SegmentMeta,
    segment_reader::SegmentReader,
};

/// The merge writer may be handed either a borrowed reader (the common
/// case: the index writer owns the segment for the duration of the merge)
/// or a shared one (a reader a query-side consumer is also holding open).
/// Either way the merge writer must not outlive a borrowed reference,
/// which this sum type makes a compile-time property rather than
/// something enforced by an aliasing-constructor convention.
pub enum ReaderRef<'a> {
    Borrowed(&'a SegmentReader),
    Owned(Arc<SegmentReader>),
}

impl<'a> ReaderRef<'a> {
    pub fn get(&self) -> &SegmentReader {
        match self {
            ReaderRef::Borrowed(r) => r,
            ReaderRef::Owned(r) => r,
        }
    }
}

/// Maps a contributing reader's local `doc_id`s into the merged segment's
/// id space. `map[old.0]` is `0` (invalid) for deleted documents, or the
/// new, dense `doc_id` otherwise.
struct DocIdMap {
    map: Vec<u32>,
}

impl DocIdMap {
    fn build(reader: &SegmentReader, next_id: &mut u32) -> Self {
        let doc_count = reader.doc_count() as usize;
        let mut map = vec![0u32; doc_count + 1];
        for old in reader.live_doc_ids() {
            map[old.0 as usize] = *next_id;
            *next_id += 1;
        }
        DocIdMap { map }
    }

    fn get(&self, old: DocId) -> Option<DocId> {
        match self.map.get(old.0 as usize) {
            Some(&0) | None => None,
            Some(&new_id) => Some(DocId(new_id)),
        }
    }
}

struct Contributor<'a> {
    reader: &'a SegmentReader,
    doc_id_map: DocIdMap,
}

#[derive(Eq, PartialEq)]
struct HeapEntry {
    term: Vec<u8>,
    contributor: usize,
    term_idx: usize,
}

impl Ord for HeapEntry {
    /// Min-heap on `term`, ties broken in favor of the lower contributor
    /// index: `BinaryHeap` pops the maximum, so both comparisons are
    /// reversed from their natural sense.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .term
            .cmp(&self.term)
            .then_with(|| other.contributor.cmp(&self.contributor))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MergeWriterConfig {
    pub skip_0: usize,
    pub skip_n: usize,
    pub max_skip_levels: usize,
    pub column_sparse_stride: usize,
}

impl Default for MergeWriterConfig {
    fn default() -> Self {
        MergeWriterConfig {
            skip_0: 8,
            skip_n: 8,
            max_skip_levels: 8,
            column_sparse_stride: 16,
        }
    }
}

pub struct MergeWriter {
    directory: Arc<dyn Directory>,
    config: MergeWriterConfig,
}

impl MergeWriter {
    pub fn new(directory: Arc<dyn Directory>, config: MergeWriterConfig) -> Self {
        MergeWriter { directory, config }
    }

    /// Merges `readers` (in input order) into a new segment named
    /// `target_name`. Returns `Ok(None)` if every input is fully deleted
    /// (no documents survive the merge at all); on any I/O error, files
    /// already created for the target are removed before the error
    /// propagates.
    #[instrument(level = "info", skip(self, readers), fields(target = %target_name, inputs = readers.len()))]
    pub fn merge(
        &self,
        readers: &[ReaderRef<'_>],
        target_name: &str,
    ) -> Result<Option<SegmentMeta>, IndexError> {
        let mut created = Vec::new();
        match self.try_merge(readers, target_name, &mut created) {
            Ok(meta) => Ok(meta),
            Err(err) => {
                for name in created {
                    if let Err(cleanup_err) = self.directory.remove(&name) {
                        tracing::warn!(file = %name, error = %cleanup_err, "failed to clean up partial merge output");
                    }
                }
                Err(err)
            },
        }
    }

    fn try_merge(
        &self,
        readers: &[ReaderRef<'_>],
        target_name: &str,
        created: &mut Vec<String>,
    ) -> Result<Option<SegmentMeta>, IndexError> {
        let mut next_id = DocId::MIN.0;
        let mut contributors = Vec::new();
        for reader_ref in readers {
            let reader = reader_ref.get();
            if reader.live_count() == 0 {
                continue;
            }
            let doc_id_map = DocIdMap::build(reader, &mut next_id);
            contributors.push(Contributor { reader, doc_id_map });
        }
        let total_live = next_id - DocId::MIN.0;
        if total_live == 0 {
            return Ok(None);
        }

        let mut schema: HashMap<String, FieldFeatures> = HashMap::new();
        for contributor in &contributors {
            for (name, features) in contributor.reader.field_schema()? {
                match schema.get(&name) {
                    None => {
                        schema.insert(name, features);
                    },
                    Some(existing) if *existing != features => {
                        return Err(IndexError::Index(format!(
                            "field {name:?} has incompatible feature sets across merge inputs"
                        )));
                    },
                    Some(_) => {},
                }
            }
        }
        let mut field_names: Vec<String> = schema.keys().cloned().collect();
        field_names.sort();

        let mut files = Vec::new();

        for field_name in &field_names {
            let features = schema[field_name];
            let (postings_bytes, dict_bytes) =
                self.merge_field(&contributors, field_name, features)?;

            let postings_file = format!("{target_name}.{field_name}.postings");
            let dict_file = format!("{target_name}.{field_name}.dict");
            self.write_file(&postings_file, &postings_bytes, created)?;
            self.write_file(&dict_file, &dict_bytes, created)?;
            files.push(postings_file);
            files.push(dict_file);
        }

        if !field_names.is_empty() {
            let mut schema_bytes = Vec::new();
            write_varlong(&mut schema_bytes, field_names.len() as u64)?;
            for field_name in &field_names {
                write_string(&mut schema_bytes, field_name)?;
                write_u8(&mut schema_bytes, schema[field_name].to_bits())?;
            }
            let schema_file = format!("{target_name}.fields");
            self.write_file(&schema_file, &schema_bytes, created)?;
            files.push(schema_file);
        }

        let mut column_names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for contributor in &contributors {
            for name in contributor.reader.stored_field_names()? {
                column_names.insert(name);
            }
        }
        for column_name in &column_names {
            let mut writer = ColumnWriter::new(self.config.column_sparse_stride);
            for contributor in &contributors {
                let Some(mut reader) = contributor.reader.open_column_reader(column_name)? else {
                    continue;
                };
                for old_id in contributor.reader.live_doc_ids() {
                    let Some(new_id) = contributor.doc_id_map.get(old_id) else {
                        continue;
                    };
                    if let Some(blob) = reader.get(old_id)? {
                        writer.add(new_id, &blob);
                    }
                }
            }
            if writer.is_empty() {
                continue;
            }
            let mut values = Vec::new();
            let mut index = Vec::new();
            writer.flush(&mut values, &mut index)?;
            let values_file = format!("{target_name}.{column_name}.values");
            let index_file = format!("{target_name}.{column_name}.index");
            self.write_file(&values_file, &values, created)?;
            self.write_file(&index_file, &index, created)?;
            files.push(values_file);
            files.push(index_file);
        }

        if !column_names.is_empty() {
            let mut columns_bytes = Vec::new();
            write_varlong(&mut columns_bytes, column_names.len() as u64)?;
            for column_name in &column_names {
                write_string(&mut columns_bytes, column_name)?;
            }
            let columns_file = format!("{target_name}.columns");
            self.write_file(&columns_file, &columns_bytes, created)?;
            files.push(columns_file);
        }

        let mask_file = format!("{target_name}.mask");
        let mut mask_bytes = Vec::new();
        DocumentMask::new(total_live as usize).encode(&mut mask_bytes)?;
        self.write_file(&mask_file, &mask_bytes, created)?;
        files.push(mask_file);

        Ok(Some(SegmentMeta::new(target_name, total_live as u64, files)))
    }

    /// Walks every contributor's term dictionary for `field_name` in
    /// merged lexicographic order via a min-heap, unioning each distinct
    /// term's postings in ascending remapped `doc_id` order.
    fn merge_field(
        &self,
        contributors: &[Contributor<'_>],
        field_name: &str,
        features: FieldFeatures,
    ) -> Result<(Vec<u8>, Vec<u8>), IndexError> {
        let mut term_readers = Vec::with_capacity(contributors.len());
        for contributor in contributors {
            let term_reader =
                contributor.reader.open_term_reader(field_name, self.config.skip_0, self.config.skip_n)?;
            term_readers.push(term_reader);
        }

        let mut heap = BinaryHeap::new();
        for (idx, term_reader) in term_readers.iter().enumerate() {
            if let Some(reader) = term_reader {
                if let Some(first) = reader.terms().first() {
                    heap.push(HeapEntry {
                        term: first.term.clone(),
                        contributor: idx,
                        term_idx: 0,
                    });
                }
            }
        }

        let mut merged_terms: Vec<(Vec<u8>, TermPostings)> = Vec::new();

        while let Some(top) = heap.pop() {
            let min_term = top.term.clone();
            let mut group = vec![(top.contributor, top.term_idx)];
            while let Some(peek) = heap.peek() {
                if peek.term == min_term {
                    let entry = heap.pop().expect("peek just confirmed an element");
                    group.push((entry.contributor, entry.term_idx));
                } else {
                    break;
                }
            }
            group.sort_by_key(|&(contributor, _)| contributor);

            let mut merged = TermPostings::new(features);
            for &(contributor_idx, term_idx) in &group {
                let term_reader = term_readers[contributor_idx]
                    .as_ref()
                    .expect("contributor present in group has an open term reader");
                let entry = &term_reader.terms()[term_idx];
                let doc_id_map = &contributors[contributor_idx].doc_id_map;
                let mut postings = term_reader.postings(entry, features)?;
                while let Some((old_doc, freq)) = postings.advance()? {
                    let Some(new_doc) = doc_id_map.get(old_doc) else {
                        continue;
                    };
                    for i in 0..freq as usize {
                        let position = if features.position { postings.positions()[i] } else { 0 };
                        let offset = if features.offset { postings.offsets()[i] } else { (0, 0) };
                        let payload = if features.payload {
                            postings.payloads()[i].clone()
                        } else {
                            None
                        };
                        merged.add_occurrence(new_doc, position, offset, payload.as_deref());
                    }
                }

                let next_idx = term_idx + 1;
                if let Some(next_term) = term_reader.terms().get(next_idx) {
                    heap.push(HeapEntry {
                        term: next_term.term.clone(),
                        contributor: contributor_idx,
                        term_idx: next_idx,
                    });
                }
            }
            merged.finish();
            merged_terms.push((min_term, merged));
        }

        let mut postings_out = Vec::new();
        let mut dict_out = Vec::new();
        write_term_dictionary(
            self.config.skip_0,
            self.config.skip_n,
            self.config.max_skip_levels,
            merged_terms.iter().map(|(term, postings)| (term.as_slice(), postings)),
            merged_terms.len(),
            &mut postings_out,
            &mut dict_out,
        )?;
        Ok((postings_out, dict_out))
    }

    fn write_file(&self, name: &str, bytes: &[u8], created: &mut Vec<String>) -> Result<(), IndexError> {
        created.push(name.to_string());
        let mut out = self.directory.create(name)?;
        std::io::Write::write_all(&mut out, bytes)?;
        out.finish()?;
        Ok(())
    }
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

    fn ctx(update_id: u64) -> UpdateContext {
        UpdateContext {
            generation: 0,
            update_id,
        }
    }

    fn write_segment(dir: Arc<dyn Directory>, name: &str, texts: &[&str]) -> SegmentMeta {
        let mut writer = SegmentWriter::new(dir, name, SegmentWriterConfig::default());
        for (i, text) in texts.iter().enumerate() {
            let fields: Document = vec![Box::new(SimpleField::new(
                "body",
                true,
                true,
                FieldFeatures::positions(),
                text.as_bytes().to_vec(),
                WhitespaceAnalyzer,
            ))];
            writer.insert(&fields, ctx(i as u64));
        }
        writer.flush().unwrap().unwrap()
    }

    #[test]
    fn merges_three_segments_with_deletions() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let meta1 = write_segment(
            dir.clone(),
            "_0",
            &["a b", "a c", "a d", "a e", "a f", "a g", "a h", "a i", "a j", "a k"],
        );
        let meta2 = write_segment(
            dir.clone(),
            "_1",
            &["a l", "a m", "a n", "a o", "a p", "a q", "a r", "a s", "a t", "a u"],
        );
        let meta3 = write_segment(
            dir.clone(),
            "_2",
            &["a v", "a w", "a x", "a y", "a z", "a 1", "a 2", "a 3", "a 4", "a 5"],
        );

        let reader1 = SegmentReader::open(dir.clone(), meta1, 8, 8).unwrap();
        let mut reader2 = SegmentReader::open(dir.clone(), meta2, 8, 8).unwrap();
        let reader3 = SegmentReader::open(dir.clone(), meta3, 8, 8).unwrap();

        // Re-open with deletions applied: write a mask marking doc 3 and 7.
        let mask_file = reader2.meta.files.iter().find(|f| f.ends_with(".mask")).unwrap().clone();
        let mut mask = DocumentMask::new(10);
        mask.mask(DocId(3));
        mask.mask(DocId(7));
        let mut mask_bytes = Vec::new();
        mask.encode(&mut mask_bytes).unwrap();
        dir.remove(&mask_file).unwrap();
        let mut out = dir.create(&mask_file).unwrap();
        std::io::Write::write_all(&mut out, &mask_bytes).unwrap();
        out.finish().unwrap();
        reader2 = SegmentReader::open(dir.clone(), reader2.meta.clone(), 8, 8).unwrap();

        let merge_writer = MergeWriter::new(dir.clone(), MergeWriterConfig::default());
        let readers = vec![
            ReaderRef::Borrowed(&reader1),
            ReaderRef::Borrowed(&reader2),
            ReaderRef::Borrowed(&reader3),
        ];
        let merged = merge_writer.merge(&readers, "_merged").unwrap().expect("non-empty merge");
        assert_eq!(merged.doc_count, 28);

        let merged_reader = SegmentReader::open(dir, merged, 8, 8).unwrap();
        let term_reader = merged_reader.open_term_reader("body", 8, 8).unwrap().unwrap();
        let entry = term_reader.find(b"a").expect("'a' appears in every surviving document");
        assert_eq!(entry.doc_frequency, 28);

        let mut postings = term_reader.postings(entry, FieldFeatures::positions()).unwrap();
        let mut docs = Vec::new();
        while let Some((doc_id, _freq)) = postings.advance().unwrap() {
            docs.push(doc_id.0);
        }
        assert_eq!(docs, (1u32..=28).collect::<Vec<_>>());
    }

    #[test]
    fn fully_deleted_inputs_yield_no_merge() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let meta = write_segment(dir.clone(), "_0", &["only doc"]);
        let mask_file = meta.files.iter().find(|f| f.ends_with(".mask")).unwrap().clone();
        let mut mask = DocumentMask::new(1);
        mask.mask(DocId(1));
        let mut mask_bytes = Vec::new();
        mask.encode(&mut mask_bytes).unwrap();
        dir.remove(&mask_file).unwrap();
        let mut out = dir.create(&mask_file).unwrap();
        std::io::Write::write_all(&mut out, &mask_bytes).unwrap();
        out.finish().unwrap();

        let reader = SegmentReader::open(dir.clone(), meta, 8, 8).unwrap();
        let merge_writer = MergeWriter::new(dir, MergeWriterConfig::default());
        let result = merge_writer.merge(&[ReaderRef::Borrowed(&reader)], "_merged").unwrap();
        assert!(result.is_none());
    }
}
