//! Multi-level skip list (component A): the on-disk acceleration structure
//! layered on top of a sequential posting stream so that seeking to a
//! `doc_id` doesn't require scanning every entry.
//!
//! A skip list with base stride `skip_0` and upper-level factor `skip_n`
//! has level `L` entries at stride `skip_0 * skip_n^L`. Level 0 points
//! directly into the underlying stream; level `L>0` additionally carries a
//! *child* pointer into the start of the corresponding level-`L-1`
//! sub-region, so a reader descends top to bottom instead of scanning.
//!
//! This is the most delicate binary format in the crate: level count,
//! per-level stride, and child-pointer placement all have to agree
//! between [`SkipWriter`] and [`SkipReader`] or seeking silently returns
//! the wrong block.

use std::io;

use common::{
    directory::InputStream,
    varint::{
        read_varlong as read_varint_u64,
        write_varlong as write_varint_u64,
    },
};

/// Computes how many skip levels (including level 0) a stream of `count`
/// entries needs: `max(1, floor(log_skip_n(count / skip_0)) + 1)` when
/// `count > skip_0`, else `0` (too few entries to bother skipping at all).
pub fn level_count_for(skip_0: usize, skip_n: usize, count: usize) -> usize {
    if count <= skip_0 {
        return 0;
    }
    let ratio = count / skip_0;
    let log = (ratio as f64).log(skip_n as f64).floor() as i64;
    (log.max(0) as usize) + 1
}

struct LevelBuffer {
    buf: Vec<u8>,
    /// Number of entries at stride `skip_0 * skip_n^level` written so far.
    last_written_at: usize,
}

/// Accumulates skip entries while a posting list is being written and
/// flushes them as the list's trailer.
pub struct SkipWriter {
    skip_0: usize,
    skip_n: usize,
    levels: Vec<LevelBuffer>,
    seen: usize,
}

impl SkipWriter {
    pub fn new(skip_0: usize, skip_n: usize) -> Self {
        assert!(skip_0 > 0, "skip_0 must be positive");
        assert!(skip_n > 1, "skip_n must be greater than 1");
        SkipWriter {
            skip_0,
            skip_n,
            levels: Vec::new(),
            seen: 0,
        }
    }

    /// Reserves level buffers for an expected `count` entries. The
    /// effective level count is `min(max_levels, level_count_for(count))`
    /// but always at least 1, since the writer doesn't know the final
    /// count up front in the general case and over-provisioned levels
    /// that never trigger are trimmed away at `flush`.
    pub fn prepare(&mut self, max_levels: usize, count: usize) {
        let computed = level_count_for(self.skip_0, self.skip_n, count);
        let effective = max_levels.min(computed.max(1)).max(1);
        self.levels.clear();
        self.levels.reserve(effective);
        for _ in 0..effective {
            self.levels.push(LevelBuffer {
                buf: Vec::new(),
                last_written_at: 0,
            });
        }
        self.seen = 0;
    }

    fn stride(&self, level: usize) -> usize {
        self.skip_0 * self.skip_n.pow(level as u32)
    }

    /// Notify the writer that `doc_id` was just appended at
    /// `posting_file_pointer` in the underlying posting stream. Writes a
    /// skip entry at every level whose stride divides the running count,
    /// from level 0 upward; stops at the first level that doesn't trigger
    /// since higher strides are always multiples of lower ones.
    pub fn skip(&mut self, doc_id: u32, posting_file_pointer: u64) -> io::Result<()> {
        self.seen += 1;
        for level in 0..self.levels.len() {
            let stride = self.stride(level);
            if self.seen % stride != 0 {
                break;
            }
            write_varint_u64(&mut self.levels[level].buf, posting_file_pointer)?;
            write_varint_u64(&mut self.levels[level].buf, doc_id as u64)?;
            if level > 0 {
                let child_offset = self.levels[level - 1].buf.len() as u64;
                write_varint_u64(&mut self.levels[level].buf, child_offset)?;
            }
            self.levels[level].last_written_at = self.seen;
        }
        Ok(())
    }

    /// Writes: `varint(level_count)`, then from the highest non-empty
    /// level down to level 0, `varlong(length)` followed by the level's
    /// bytes. Trailing empty levels are trimmed; an intermediate empty
    /// level is a writer bug, not a recoverable situation, so it asserts.
    pub fn flush(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let top = self
            .levels
            .iter()
            .rposition(|level| !level.buf.is_empty());
        let Some(top) = top else {
            write_varint_u64(out, 0)?;
            return Ok(());
        };
        write_varint_u64(out, (top + 1) as u64)?;
        for level in (0..=top).rev() {
            let buf = &self.levels[level].buf;
            assert!(
                !buf.is_empty(),
                "intermediate skip level {level} is empty; skip-list writer invariant violated"
            );
            write_varint_u64(out, buf.len() as u64)?;
            out.write_all(buf)?;
        }
        Ok(())
    }
}

/// One loaded skip level. `stream` is an independent cursor (via
/// `InputStream::dup`) so levels can be seeked without disturbing each
/// other, and `child` is `None` for level 0 (the IResearch `UNDEFINED`
/// sentinel: the base level never reads a child pointer).
pub struct SkipLevel {
    pub id: usize,
    stream: Box<dyn InputStream>,
    begin: u64,
    end: u64,
    has_child: bool,
    pub child: u64,
    pub skipped: usize,
    pub last_doc: u32,
    pub last_file_pointer: u64,
}

pub struct SkipReader {
    skip_0: usize,
    skip_n: usize,
    levels: Vec<SkipLevel>,
}

impl SkipReader {
    pub fn new(skip_0: usize, skip_n: usize) -> Self {
        SkipReader {
            skip_0,
            skip_n,
            levels: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[SkipLevel] {
        &self.levels
    }

    /// Loads the trailer written by [`SkipWriter::flush`] starting at the
    /// input's current position. Fails if any level's recorded length is
    /// zero — a zero-length level is always a format error.
    pub fn prepare(&mut self, mut input: Box<dyn InputStream>) -> io::Result<()> {
        let max_levels = read_varint_u64(&mut input)? as usize;
        self.levels.clear();
        if max_levels == 0 {
            return Ok(());
        }

        for id in (1..max_levels).rev() {
            self.load_level(&mut input, id, true)?;
        }
        self.load_level(&mut input, 0, false)?;
        Ok(())
    }

    fn load_level(
        &mut self,
        input: &mut Box<dyn InputStream>,
        id: usize,
        has_child: bool,
    ) -> io::Result<()> {
        let length = read_varint_u64(input)?;
        if length == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "zero-length skip level",
            ));
        }
        let begin = input.file_pointer()?;
        let end = begin + length;
        let mut dup = input.dup()?;
        dup.seek(io::SeekFrom::Start(begin))?;
        self.levels.push(SkipLevel {
            id,
            stream: dup,
            begin,
            end,
            has_child,
            child: 0,
            skipped: 0,
            last_doc: 0,
            last_file_pointer: 0,
        });
        input.seek(io::SeekFrom::Start(end))?;
        Ok(())
    }

    /// Rewinds every level to its start, clearing skip counts.
    pub fn reset(&mut self) -> io::Result<()> {
        for level in &mut self.levels {
            level.stream.seek(io::SeekFrom::Start(level.begin))?;
            level.child = 0;
            level.skipped = 0;
            level.last_doc = 0;
            level.last_file_pointer = 0;
        }
        Ok(())
    }

    /// Idempotent seek within one level: a no-op if `begin + ptr` is at or
    /// before the level's current position, otherwise seeks there and
    /// records `skipped`. `ptr` always lands on an entry boundary (the
    /// start of its `fp` field), so the entry itself — `fp`, `doc`, and
    /// (if this level has one) `child` — is left for [`read_next_entry`]
    /// to read; this must not eagerly consume any of those bytes itself.
    pub fn seek_skip(&mut self, level_idx: usize, ptr: u64, skipped: usize) -> io::Result<()> {
        let level = &mut self.levels[level_idx];
        let absolute = level.begin + ptr;
        let current = level.stream.file_pointer()?;
        if absolute <= current {
            return Ok(());
        }
        level.stream.seek(io::SeekFrom::Start(absolute))?;
        level.skipped = skipped;
        Ok(())
    }

    /// Reads the next `(file_pointer, doc_id[, child])` entry from `level`
    /// if one remains before `end`, advancing the level's cursor and
    /// updating `last_doc`/`last_file_pointer`/`child`.
    pub fn read_next_entry(&mut self, level_idx: usize) -> io::Result<bool> {
        let level = &mut self.levels[level_idx];
        let pos = level.stream.file_pointer()?;
        if pos >= level.end {
            return Ok(false);
        }
        let file_pointer = read_varint_u64(&mut level.stream)?;
        let doc_id = read_varint_u64(&mut level.stream)? as u32;
        level.last_file_pointer = file_pointer;
        level.last_doc = doc_id;
        if level.has_child {
            level.child = read_varint_u64(&mut level.stream)?;
        }
        Ok(true)
    }

    /// Descends the skip list to find the furthest posting-stream file
    /// pointer known not to exceed `target`. Returns `(file_pointer,
    /// last_doc_seen, docs_skipped)`; `docs_skipped` is how many entries
    /// worth of postings the caller can safely skip over sequentially
    /// before resuming a linear scan for `target`.
    pub fn skip_to(&mut self, target: u32) -> io::Result<(u64, u32, usize)> {
        if self.levels.is_empty() {
            return Ok((0, 0, 0));
        }
        let mut level_idx = 0; // index 0 in `levels` is the topmost level on disk.
        let mut best_pointer = 0u64;
        let mut best_doc = 0u32;
        let mut best_skipped = 0usize;
        // Child pointer of the best (furthest, still <= target) entry seen
        // at the current level, not whatever entry `read_next_entry` last
        // landed on — that last entry is often the one that overshot.
        let mut best_child = 0u64;

        loop {
            while self.read_next_entry(level_idx)? {
                let level = &self.levels[level_idx];
                if level.last_doc > target {
                    // Overshot: rewind the cursor conceptually by not consuming
                    // further; the next level down will refine from `best_*`.
                    break;
                }
                best_pointer = level.last_file_pointer;
                best_doc = level.last_doc;
                best_skipped = level.skipped + self.stride(level.id);
                best_child = level.child;
                self.levels[level_idx].skipped = best_skipped;
            }
            if level_idx + 1 >= self.levels.len() {
                break;
            }
            level_idx += 1;
            self.seek_skip(level_idx, best_child, best_skipped)?;
        }
        Ok((best_pointer, best_doc, best_skipped))
    }

    fn stride(&self, id: usize) -> usize {
        self.skip_0 * self.skip_n.pow(id as u32)
    }
}

#[cfg(test)]
mod tests {
    use common::directory::{
        Directory,
        RamDirectory,
    };

    use super::*;

    #[test]
    fn level_count_matches_scenario() {
        // skip_0 = 8, skip_n = 8, 200 documents.
        assert_eq!(level_count_for(8, 8, 200), 2);
    }

    #[test]
    fn writer_reader_roundtrip() {
        let mut writer = SkipWriter::new(8, 8);
        writer.prepare(8, 200);
        for doc in 1u32..=200 {
            writer.skip(doc, doc as u64 * 10).unwrap();
        }
        let mut bytes = Vec::new();
        writer.flush(&mut bytes).unwrap();

        let dir = RamDirectory::new();
        let mut out = dir.create("postings.skip").unwrap();
        std::io::Write::write_all(&mut out, &bytes).unwrap();
        out.finish().unwrap();

        let mut reader = SkipReader::new(8, 8);
        reader.prepare(dir.open("postings.skip").unwrap()).unwrap();
        assert_eq!(reader.levels().len(), 2);
        assert_eq!(reader.levels()[0].id, 1);
        assert_eq!(reader.levels()[1].id, 0);
    }

    #[test]
    fn skip_to_lands_on_or_before_target() {
        let mut writer = SkipWriter::new(8, 8);
        writer.prepare(8, 200);
        for doc in 1u32..=200 {
            writer.skip(doc, doc as u64 * 10).unwrap();
        }
        let mut bytes = Vec::new();
        writer.flush(&mut bytes).unwrap();

        let dir = RamDirectory::new();
        let mut out = dir.create("postings.skip").unwrap();
        std::io::Write::write_all(&mut out, &bytes).unwrap();
        out.finish().unwrap();

        let mut reader = SkipReader::new(8, 8);
        reader.prepare(dir.open("postings.skip").unwrap()).unwrap();

        let (pointer, doc, skipped) = reader.skip_to(180).unwrap();
        assert!(doc <= 180);
        assert!(skipped <= 180);
        assert_eq!(pointer, doc as u64 * 10);
    }

    #[test]
    fn skip_to_holds_for_random_targets_and_strides() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let skip_0 = rng.gen_range(2..6);
            let skip_n = rng.gen_range(2..6);
            let doc_count = rng.gen_range(50..300);

            let mut writer = SkipWriter::new(skip_0, skip_n);
            writer.prepare(8, doc_count);
            let mut doc = 0u32;
            let mut docs = Vec::with_capacity(doc_count);
            for _ in 0..doc_count {
                doc += rng.gen_range(1..4);
                writer.skip(doc, doc as u64 * 10).unwrap();
                docs.push(doc);
            }
            let mut bytes = Vec::new();
            writer.flush(&mut bytes).unwrap();

            let dir = RamDirectory::new();
            let file_name = format!("fuzz-{skip_0}-{skip_n}.skip");
            let mut out = dir.create(&file_name).unwrap();
            std::io::Write::write_all(&mut out, &bytes).unwrap();
            out.finish().unwrap();

            let mut reader = SkipReader::new(skip_0, skip_n);
            reader.prepare(dir.open(&file_name).unwrap()).unwrap();

            let target = docs[rng.gen_range(0..docs.len())];
            let (pointer, landed_doc, skipped) = reader.skip_to(target).unwrap();
            assert!(landed_doc <= target, "skip_to must never overshoot its target");
            assert!(skipped <= target);
            assert_eq!(pointer, landed_doc as u64 * 10);
        }
    }

    #[test]
    fn zero_length_level_is_format_error() {
        let dir = RamDirectory::new();
        let mut out = dir.create("bad.skip").unwrap();
        write_varint_u64(&mut out, 1).unwrap(); // claims 1 level
        write_varint_u64(&mut out, 0).unwrap(); // zero length: invalid
        out.finish().unwrap();

        let mut reader = SkipReader::new(8, 8);
        let err = reader.prepare(dir.open("bad.skip").unwrap()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
