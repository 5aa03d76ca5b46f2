//! Column store (component D): stored-field values as `(doc_id, blob)`
//! pairs in ascending `doc_id` order, plus a sparse `doc_id -> offset`
//! index so a reader can bisect to the right neighborhood of the value
//! file instead of scanning from the start.

use std::io;

use common::{
    directory::InputStream,
    doc_id::DocId,
    varint::{
        read_bytes,
        read_varlong,
        write_bytes,
        write_varlong,
    },
};

/// Every this-many entries, the writer drops a sparse index checkpoint.
/// Matches the skip-list's `skip_0` in spirit but is independent of it —
/// columns have no levels, just one flat sparse index.
const DEFAULT_SPARSE_STRIDE: usize = 16;

pub struct ColumnWriter {
    sparse_stride: usize,
    values: Vec<u8>,
    index: Vec<(DocId, u64)>,
    count: usize,
    last_doc: Option<DocId>,
}

impl Default for ColumnWriter {
    fn default() -> Self {
        Self::new(DEFAULT_SPARSE_STRIDE)
    }
}

impl ColumnWriter {
    pub fn new(sparse_stride: usize) -> Self {
        ColumnWriter {
            sparse_stride: sparse_stride.max(1),
            values: Vec::new(),
            index: Vec::new(),
            count: 0,
            last_doc: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends `blob` for `doc_id`. `doc_id` must be strictly greater than
    /// the previously added one.
    pub fn add(&mut self, doc_id: DocId, blob: &[u8]) {
        assert!(
            self.last_doc.map_or(true, |last| doc_id > last),
            "column doc_ids must be strictly ascending"
        );
        if self.count % self.sparse_stride == 0 {
            self.index.push((doc_id, self.values.len() as u64));
        }
        write_varlong(&mut self.values, doc_id.0 as u64).expect("Vec<u8> write cannot fail");
        write_bytes(&mut self.values, blob).expect("Vec<u8> write cannot fail");
        self.count += 1;
        self.last_doc = Some(doc_id);
    }

    /// Writes the value stream to `values_out` and the sparse index to
    /// `index_out`.
    pub fn flush(&self, values_out: &mut dyn io::Write, index_out: &mut dyn io::Write) -> io::Result<()> {
        values_out.write_all(&self.values)?;
        write_varlong(index_out, self.index.len() as u64)?;
        for &(doc_id, offset) in &self.index {
            write_varlong(index_out, doc_id.0 as u64)?;
            write_varlong(index_out, offset)?;
        }
        Ok(())
    }
}

pub struct ColumnReader {
    values: Box<dyn InputStream>,
    index: Vec<(DocId, u64)>,
}

impl ColumnReader {
    pub fn open(values: Box<dyn InputStream>, index_input: &mut dyn io::Read) -> io::Result<Self> {
        let count = read_varlong(index_input)? as usize;
        let mut index = Vec::with_capacity(count);
        for _ in 0..count {
            let doc_id = DocId(read_varlong(index_input)? as u32);
            let offset = read_varlong(index_input)?;
            index.push((doc_id, offset));
        }
        Ok(ColumnReader { values, index })
    }

    /// Looks up the blob stored for `doc_id`, scanning forward from the
    /// nearest sparse checkpoint at or before it.
    pub fn get(&mut self, doc_id: DocId) -> io::Result<Option<Vec<u8>>> {
        use std::io::{
            Seek,
            SeekFrom,
        };

        let start_offset = match self.index.partition_point(|&(d, _)| d <= doc_id) {
            0 => return Ok(None),
            n => self.index[n - 1].1,
        };
        self.values.seek(SeekFrom::Start(start_offset))?;
        loop {
            let current = match read_varlong(&mut self.values) {
                Ok(v) => DocId(v as u32),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            };
            let blob = read_bytes(&mut self.values)?;
            match current.cmp(&doc_id) {
                std::cmp::Ordering::Equal => return Ok(Some(blob)),
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => continue,
            }
        }
    }
}
