//! Index manifest: the single source of truth for "what segments make up
//! the index right now". Published by an atomic rename so a reader always
//! sees either the previous generation or the next one, never a
//! half-written file.

use std::io;

use common::varint::{
    read_u32,
    read_u64,
    read_varlong,
    write_u32,
    write_u64,
    write_varlong,
};

use crate::segment_meta::SegmentMeta;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub generation: u64,
    pub segments: Vec<SegmentMeta>,
}

impl Manifest {
    pub fn empty() -> Self {
        Manifest {
            generation: 0,
            segments: Vec::new(),
        }
    }

    pub fn next_generation(&self, segments: Vec<SegmentMeta>) -> Self {
        Manifest {
            generation: self.generation + 1,
            segments,
        }
    }

    pub fn encode(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let mut body = Vec::new();
        write_u64(&mut body, self.generation)?;
        write_varlong(&mut body, self.segments.len() as u64)?;
        for segment in &self.segments {
            segment.encode(&mut body)?;
        }
        out.write_all(&body)?;
        write_u32(out, fnv1a32(&body))
    }

    pub fn decode(input: &mut dyn io::Read) -> io::Result<Self> {
        let mut body = Vec::new();
        input.read_to_end(&mut body)?;
        if body.len() < 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "manifest too short to contain a checksum",
            ));
        }
        let (payload, checksum_bytes) = body.split_at(body.len() - 4);
        let expected = fnv1a32(payload);
        let actual = read_u32(&mut &checksum_bytes[..])?;
        if actual != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("manifest checksum mismatch: expected {expected}, found {actual}"),
            ));
        }

        let mut cursor = io::Cursor::new(payload);
        let generation = read_u64(&mut cursor)?;
        let segment_count = read_varlong(&mut cursor)? as usize;
        let mut segments = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            segments.push(SegmentMeta::decode(&mut cursor)?);
        }
        Ok(Manifest {
            generation,
            segments,
        })
    }
}

/// FNV-1a over 32 bits. Not cryptographic; exists only to catch a
/// truncated or corrupted manifest write, not to defend against tampering.
fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u32).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let manifest = Manifest {
            generation: 7,
            segments: vec![SegmentMeta::new("_0", 3, vec!["_0.terms".to_string()])],
        };
        let mut buf = Vec::new();
        manifest.encode(&mut buf).unwrap();

        let decoded = Manifest::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn detects_corruption() {
        let manifest = Manifest::empty();
        let mut buf = Vec::new();
        manifest.encode(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        assert!(Manifest::decode(&mut Cursor::new(buf)).is_err());
    }
}
