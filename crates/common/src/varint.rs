//! Primitive byte encoders shared by every on-disk codec in this workspace:
//! fixed-width integers, unsigned LEB128-style varints (7 bits per byte),
//! zig-zag signed varints, and length-prefixed byte strings.
//!
//! These are deliberately free functions over `Write`/`Read` rather than a
//! trait: small `byteorder`-based helpers compose more easily than a
//! bespoke serialization trait hierarchy would here.

use std::io::{
    self,
    Read,
    Write,
};

use byteorder::{
    LittleEndian,
    ReadBytesExt,
    WriteBytesExt,
};

pub fn write_u8(out: &mut impl Write, v: u8) -> io::Result<()> {
    out.write_u8(v)
}

pub fn read_u8(input: &mut impl Read) -> io::Result<u8> {
    input.read_u8()
}

pub fn write_u32(out: &mut impl Write, v: u32) -> io::Result<()> {
    out.write_u32::<LittleEndian>(v)
}

pub fn read_u32(input: &mut impl Read) -> io::Result<u32> {
    input.read_u32::<LittleEndian>()
}

pub fn write_u64(out: &mut impl Write, v: u64) -> io::Result<()> {
    out.write_u64::<LittleEndian>(v)
}

pub fn read_u64(input: &mut impl Read) -> io::Result<u64> {
    input.read_u64::<LittleEndian>()
}

/// Unsigned LEB128-style varint: 7 data bits per byte, high bit set on all
/// but the last byte.
pub fn write_varint(out: &mut impl Write, mut v: u32) -> io::Result<()> {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.write_u8(byte)?;
            return Ok(());
        }
        out.write_u8(byte | 0x80)?;
    }
}

pub fn read_varint(input: &mut impl Read) -> io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = input.read_u8()?;
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 35 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long",
            ));
        }
    }
}

/// Same encoding as [`write_varint`] but over a 64-bit value, used for file
/// lengths and offsets that can exceed `u32::MAX`.
pub fn write_varlong(out: &mut impl Write, mut v: u64) -> io::Result<()> {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.write_u8(byte)?;
            return Ok(());
        }
        out.write_u8(byte | 0x80)?;
    }
}

pub fn read_varlong(input: &mut impl Read) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = input.read_u8()?;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 70 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varlong too long",
            ));
        }
    }
}

pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

pub fn write_zigzag_varlong(out: &mut impl Write, v: i64) -> io::Result<()> {
    write_varlong(out, zigzag_encode(v))
}

pub fn read_zigzag_varlong(input: &mut impl Read) -> io::Result<i64> {
    Ok(zigzag_decode(read_varlong(input)?))
}

pub fn write_bytes(out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    write_varint(out, bytes.len() as u32)?;
    out.write_all(bytes)
}

pub fn read_bytes(input: &mut impl Read) -> io::Result<Vec<u8>> {
    let len = read_varint(input)? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_string(out: &mut impl Write, s: &str) -> io::Result<()> {
    write_bytes(out, s.as_bytes())
}

pub fn read_string(input: &mut impl Read) -> io::Result<String> {
    let bytes = read_bytes(input)?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
