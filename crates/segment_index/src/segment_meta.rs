//! `segment_meta`: the descriptor written alongside every flushed or
//! merged segment — its name, how many live documents it holds, which
//! files make it up, and a codec version stamp so a future reader can
//! refuse to open a segment it doesn't understand.

use std::io;

use common::varint::{
    read_string,
    read_u32,
    read_varlong,
    write_string,
    write_u32,
    write_varlong,
};

/// Bumped whenever the on-disk encoding of a segment's files changes in a
/// way old readers can't tolerate.
pub const SEGMENT_CODEC_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentMeta {
    pub name: String,
    pub doc_count: u64,
    pub files: Vec<String>,
    pub version: u32,
}

impl SegmentMeta {
    pub fn new(name: impl Into<String>, doc_count: u64, files: Vec<String>) -> Self {
        SegmentMeta {
            name: name.into(),
            doc_count,
            files,
            version: SEGMENT_CODEC_VERSION,
        }
    }

    pub fn encode(&self, out: &mut dyn io::Write) -> io::Result<()> {
        write_string(out, &self.name)?;
        write_varlong(out, self.doc_count)?;
        write_varlong(out, self.files.len() as u64)?;
        for file in &self.files {
            write_string(out, file)?;
        }
        write_u32(out, self.version)
    }

    pub fn decode(input: &mut dyn io::Read) -> io::Result<Self> {
        let name = read_string(input)?;
        let doc_count = read_varlong(input)?;
        let file_count = read_varlong(input)? as usize;
        let mut files = Vec::with_capacity(file_count);
        for _ in 0..file_count {
            files.push(read_string(input)?);
        }
        let version = read_u32(input)?;
        if version > SEGMENT_CODEC_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "segment {name:?}: codec version {version} is newer than this binary supports ({SEGMENT_CODEC_VERSION})"
                ),
            ));
        }
        Ok(SegmentMeta {
            name,
            doc_count,
            files,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let meta = SegmentMeta::new(
            "_0",
            42,
            vec!["_0.terms".to_string(), "_0.postings".to_string()],
        );
        let mut buf = Vec::new();
        meta.encode(&mut buf).unwrap();

        let decoded = SegmentMeta::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn rejects_future_codec_version() {
        let meta = SegmentMeta::new("_0", 1, vec![]);
        let mut buf = Vec::new();
        meta.encode(&mut buf).unwrap();
        // Overwrite the trailing version field with something unknown.
        let len = buf.len();
        buf[len - 4..].copy_from_slice(&(SEGMENT_CODEC_VERSION + 1).to_le_bytes());

        assert!(SegmentMeta::decode(&mut Cursor::new(buf)).is_err());
    }
}
