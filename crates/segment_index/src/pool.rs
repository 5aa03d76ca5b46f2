//! The segment-writer pool the index writer leases from: a fixed number
//! of reusable [`SegmentWriter`]s, guarded by a mutex and condition
//! variable so leasing blocks when every writer is checked out, in the
//! shape of `rust_runner/src/pool.rs`'s `ConnectionPool` — an `available`
//! queue plus a condvar that wakes a waiter as soon as something is
//! pushed back.

use std::{
    collections::VecDeque,
    sync::Arc,
};

use common::directory::Directory;
use parking_lot::{
    Condvar,
    Mutex,
};

use crate::segment_writer::{
    SegmentWriter,
    SegmentWriterConfig,
};

pub struct SegmentWriterPool {
    available: Mutex<VecDeque<SegmentWriter>>,
    condvar: Condvar,
    size: usize,
}

impl SegmentWriterPool {
    /// Eagerly creates `size` writers, naming them via `name_for(index)` so
    /// the index writer controls the segment-naming scheme.
    pub fn new(
        directory: Arc<dyn Directory>,
        config: SegmentWriterConfig,
        size: usize,
        name_for: impl Fn(usize) -> String,
    ) -> Self {
        let mut writers = VecDeque::with_capacity(size);
        for i in 0..size {
            writers.push_back(SegmentWriter::new(directory.clone(), name_for(i), config));
        }
        SegmentWriterPool {
            available: Mutex::new(writers),
            condvar: Condvar::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Blocks until a writer is available, then removes it from the pool.
    pub fn lease(&self) -> SegmentWriter {
        let mut available = self.available.lock();
        loop {
            if let Some(writer) = available.pop_front() {
                return writer;
            }
            self.condvar.wait(&mut available);
        }
    }

    /// Returns a writer to the pool and wakes one waiting leaser, if any.
    pub fn release(&self, writer: SegmentWriter) {
        self.available.lock().push_back(writer);
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::Duration,
    };

    use common::directory::RamDirectory;

    use super::*;

    #[test]
    fn lease_blocks_until_release() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let pool = Arc::new(SegmentWriterPool::new(
            dir,
            SegmentWriterConfig::default(),
            1,
            |i| format!("_{i}"),
        ));

        let first = pool.lease();
        assert_eq!(first.name(), "_0");

        let pool_clone = pool.clone();
        let handle = thread::spawn(move || {
            let second = pool_clone.lease();
            assert_eq!(second.name(), "_0");
        });

        thread::sleep(Duration::from_millis(50));
        pool.release(first);
        handle.join().unwrap();
    }
}
