//! Segment writer (component E): turns a stream of documents into one
//! flushed segment — an inverted index per indexed field, a column store
//! per stored field, and a document mask for documents whose indexing
//! failed partway through.

use std::{
    collections::HashMap,
    sync::atomic::{
        AtomicU32,
        Ordering,
    },
};

use common::{
    directory::Directory,
    doc_id::{
        DocId,
        UpdateContext,
    },
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
    field::Document,
    field_data::FieldData,
    segment_meta::SegmentMeta,
};

#[derive(Clone, Copy, Debug)]
pub struct SegmentWriterConfig {
    pub skip_0: usize,
    pub skip_n: usize,
    pub max_skip_levels: usize,
    pub column_sparse_stride: usize,
}

impl Default for SegmentWriterConfig {
    fn default() -> Self {
        SegmentWriterConfig {
            skip_0: 8,
            skip_n: 8,
            max_skip_levels: 8,
            column_sparse_stride: 16,
        }
    }
}

/// A segment writer leased from the index writer's pool. `insert` is not
/// `Send`-guarded internally: a leased writer is used by a single thread
/// for the lifetime of its lease, so no locking is needed here — the
/// pool's mutex is what serializes leasing.
pub struct SegmentWriter {
    directory: std::sync::Arc<dyn Directory>,
    name: String,
    config: SegmentWriterConfig,
    fields: HashMap<String, FieldData>,
    columns: HashMap<String, ColumnWriter>,
    next_doc: AtomicU32,
    doc_mask: DocumentMask,
    update_contexts: HashMap<DocId, UpdateContext>,
    created_files: Vec<String>,
}

impl SegmentWriter {
    pub fn new(
        directory: std::sync::Arc<dyn Directory>,
        name: impl Into<String>,
        config: SegmentWriterConfig,
    ) -> Self {
        SegmentWriter {
            directory,
            name: name.into(),
            config,
            fields: HashMap::new(),
            columns: HashMap::new(),
            next_doc: AtomicU32::new(0),
            doc_mask: DocumentMask::new(0),
            update_contexts: HashMap::new(),
            created_files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_count(&self) -> u32 {
        self.next_doc.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count() == 0
    }

    pub fn update_contexts(&self) -> &HashMap<DocId, UpdateContext> {
        &self.update_contexts
    }

    /// Masks `doc_id` within this still-open writer, e.g. to satisfy an
    /// update that supersedes a document inserted earlier in the same
    /// transaction. Has no effect on documents already flushed to a
    /// published segment — a segment's files, including its mask, are
    /// never rewritten once flushed; superseding those requires
    /// consolidation, not an in-place mask update.
    pub fn mask(&mut self, doc_id: DocId) {
        self.doc_mask.mask(doc_id);
    }

    /// Indexes and/or stores one document's fields. Returns `false` if any
    /// indexed field failed, in which case the document is masked rather
    /// than left partially visible; the caller's `ctx` is recorded either
    /// way so the index writer can still resolve update semantics for it.
    #[instrument(level = "debug", skip(self, fields), fields(segment = %self.name))]
    pub fn insert(&mut self, fields: &Document, ctx: UpdateContext) -> bool {
        let doc_id = DocId(DocId::MIN.0 + self.next_doc.fetch_add(1, Ordering::SeqCst));
        let mut success = true;

        for field in fields.iter() {
            if !field.indexed() {
                continue;
            }
            let field_data = self
                .fields
                .entry(field.name().to_string())
                .or_insert_with(|| FieldData::new(field.name(), field.features()));
            let mut tokens = field.analyzer().reset(field.value());
            while tokens.advance() {
                let token = tokens.current();
                let result = field_data.add_token(
                    doc_id,
                    token.term_bytes(),
                    token.position_increment(),
                    token.offset(),
                    token.payload(),
                );
                if result.is_err() {
                    success = false;
                    break;
                }
            }
            if !success {
                break;
            }
        }

        if success {
            for field in fields.iter() {
                if !field.stored() {
                    continue;
                }
                let column = self
                    .columns
                    .entry(field.name().to_string())
                    .or_insert_with(|| ColumnWriter::new(self.config.column_sparse_stride));
                column.add(doc_id, field.value());
            }
        }

        if !success {
            self.doc_mask.mask(doc_id);
        }
        self.update_contexts.insert(doc_id, ctx);
        success
    }

    /// Finalizes term dictionaries, posting lists, column files, and the
    /// segment meta. A no-op (`Ok(None)`) if no documents were indexed.
    /// On any I/O error the partial files already created are removed
    /// before the error propagates, so a failed flush never leaves stray
    /// files behind for the index writer to account for.
    #[instrument(level = "info", skip(self), fields(segment = %self.name))]
    pub fn flush(&mut self) -> Result<Option<SegmentMeta>, IndexError> {
        match self.try_flush() {
            Ok(meta) => Ok(meta),
            Err(err) => {
                self.discard_created_files();
                Err(err)
            },
        }
    }

    fn try_flush(&mut self) -> Result<Option<SegmentMeta>, IndexError> {
        let doc_count = self.doc_count() as u64;
        if doc_count == 0 {
            return Ok(None);
        }

        let mut files = Vec::new();

        let mut field_names: Vec<String> = self.fields.keys().cloned().collect();
        field_names.sort();
        for field_name in &field_names {
            let field = self.fields.get_mut(field_name).expect("field_names drawn from self.fields");
            field.finish();

            let mut postings = Vec::new();
            let mut dict = Vec::new();
            field.write_postings(
                self.config.skip_0,
                self.config.skip_n,
                self.config.max_skip_levels,
                &mut postings,
                &mut dict,
            )?;

            let postings_file = format!("{}.{field_name}.postings", self.name);
            let dict_file = format!("{}.{field_name}.dict", self.name);
            self.write_file(&postings_file, &postings)?;
            self.write_file(&dict_file, &dict)?;
            files.push(postings_file);
            files.push(dict_file);
        }

        if !field_names.is_empty() {
            let mut schema = Vec::new();
            write_varlong(&mut schema, field_names.len() as u64)?;
            for field_name in &field_names {
                let features = self.fields[field_name].features();
                write_string(&mut schema, field_name)?;
                write_u8(&mut schema, features.to_bits())?;
            }
            let schema_file = format!("{}.fields", self.name);
            self.write_file(&schema_file, &schema)?;
            files.push(schema_file);
        }

        let mut column_names: Vec<String> = self
            .columns
            .iter()
            .filter(|(_, column)| !column.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        column_names.sort();
        for column_name in &column_names {
            let column = self.columns.get(column_name).expect("column_names drawn from self.columns");
            let mut values = Vec::new();
            let mut index = Vec::new();
            column.flush(&mut values, &mut index)?;

            let values_file = format!("{}.{column_name}.values", self.name);
            let index_file = format!("{}.{column_name}.index", self.name);
            self.write_file(&values_file, &values)?;
            self.write_file(&index_file, &index)?;
            files.push(values_file);
            files.push(index_file);
        }

        if !column_names.is_empty() {
            let mut columns_list = Vec::new();
            write_varlong(&mut columns_list, column_names.len() as u64)?;
            for column_name in &column_names {
                write_string(&mut columns_list, column_name)?;
            }
            let columns_file = format!("{}.columns", self.name);
            self.write_file(&columns_file, &columns_list)?;
            files.push(columns_file);
        }

        let mask_file = format!("{}.mask", self.name);
        let mut mask_bytes = Vec::new();
        self.doc_mask.encode(&mut mask_bytes)?;
        self.write_file(&mask_file, &mask_bytes)?;
        files.push(mask_file);

        Ok(Some(SegmentMeta::new(self.name.clone(), doc_count, files)))
    }

    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<(), IndexError> {
        self.created_files.push(name.to_string());
        let mut out = self.directory.create(name)?;
        std::io::Write::write_all(&mut out, bytes)?;
        out.finish()?;
        Ok(())
    }

    fn discard_created_files(&mut self) {
        for name in self.created_files.drain(..) {
            if let Err(err) = self.directory.remove(&name) {
                tracing::warn!(file = %name, error = %err, "failed to clean up partial segment file");
            }
        }
    }

    /// Discards all in-memory state, making the writer reusable from the
    /// pool. `new_name` lets the pool assign the next segment its name
    /// before the first `insert`.
    pub fn reset(&mut self, new_name: Option<String>) {
        self.fields.clear();
        self.columns.clear();
        self.next_doc.store(0, Ordering::SeqCst);
        self.doc_mask = DocumentMask::new(0);
        self.update_contexts.clear();
        self.created_files.clear();
        if let Some(name) = new_name {
            self.name = name;
        }
    }
}
