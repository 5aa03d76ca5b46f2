//! The `Directory` abstraction consumed by the segmented write path:
//! filesystem, memory-mapped, or purely in-memory storage, addressed only
//! through `create` / `open` / `exists` / `remove` / `rename` / `len` /
//! `list`. Consumed, not designed, by the write path above it — but this
//! crate ships two concrete implementations, [`RamDirectory`] for tests
//! and [`FsDirectory`] for the ingestion binary, so the rest of the
//! workspace has something to compile and run against.

use std::{
    collections::HashMap,
    fs,
    io::{
        self,
        Cursor,
        Read,
        Seek,
        SeekFrom,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
    },
};

use parking_lot::RwLock;

/// A writable, append-only handle to a file being created in a
/// [`Directory`]. Callers must call [`OutputStream::finish`] once all bytes
/// have been written; the file is not guaranteed visible to `open` or
/// `list` before that.
pub trait OutputStream: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// A readable, seekable handle into a file in a [`Directory`]. Supports
/// `dup()` so multiple independent cursors can be open over the same file
/// at once, which the skip-list reader relies on to give every level its
/// own seek position.
pub trait InputStream: Read + Seek + Send {
    fn dup(&self) -> io::Result<Box<dyn InputStream>>;
    fn len(&self) -> u64;

    fn file_pointer(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::Current(0))
    }
}

pub trait Directory: Send + Sync {
    fn create(&self, name: &str) -> io::Result<Box<dyn OutputStream>>;
    fn open(&self, name: &str) -> io::Result<Box<dyn InputStream>>;
    fn exists(&self, name: &str) -> io::Result<bool>;
    fn remove(&self, name: &str) -> io::Result<()>;
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;
    fn len(&self, name: &str) -> io::Result<u64>;
    fn list(&self) -> io::Result<Vec<String>>;
}

// ---------------------------------------------------------------------
// RamDirectory
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RamDirectory {
    files: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
}

impl RamDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

struct RamOutputStream {
    name: String,
    buf: Vec<u8>,
    files: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
}

impl Write for RamOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputStream for RamOutputStream {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.files.write().insert(self.name, self.buf.into());
        Ok(())
    }
}

struct RamInputStream {
    cursor: Cursor<Arc<[u8]>>,
}

impl Read for RamInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for RamInputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl InputStream for RamInputStream {
    fn dup(&self) -> io::Result<Box<dyn InputStream>> {
        Ok(Box::new(RamInputStream {
            cursor: Cursor::new(self.cursor.get_ref().clone()),
        }))
    }

    fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }
}

impl Directory for RamDirectory {
    fn create(&self, name: &str) -> io::Result<Box<dyn OutputStream>> {
        Ok(Box::new(RamOutputStream {
            name: name.to_string(),
            buf: Vec::new(),
            files: self.files.clone(),
        }))
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn InputStream>> {
        let bytes = self
            .files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        Ok(Box::new(RamInputStream {
            cursor: Cursor::new(bytes),
        }))
    }

    fn exists(&self, name: &str) -> io::Result<bool> {
        Ok(self.files.read().contains_key(name))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut files = self.files.write();
        let bytes = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.to_string()))?;
        files.insert(to.to_string(), bytes);
        Ok(())
    }

    fn len(&self, name: &str) -> io::Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|b| b.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------
// FsDirectory
// ---------------------------------------------------------------------

/// Plain filesystem-backed directory. `rename` is used by the index
/// writer's commit path and relies on the OS rename being atomic within a
/// single filesystem, which holds for the local filesystems this is meant
/// to run against.
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

struct FsOutputStream {
    inner: Mutex<fs::File>,
}

impl Write for FsOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.get_mut().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.get_mut().unwrap().flush()
    }
}

impl OutputStream for FsOutputStream {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()?;
        self.inner.into_inner().unwrap().sync_all()
    }
}

struct FsInputStream {
    file: fs::File,
    length: u64,
}

impl Read for FsInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FsInputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl InputStream for FsInputStream {
    fn dup(&self) -> io::Result<Box<dyn InputStream>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(FsInputStream {
            file,
            length: self.length,
        }))
    }

    fn len(&self) -> u64 {
        self.length
    }
}

impl Directory for FsDirectory {
    fn create(&self, name: &str) -> io::Result<Box<dyn OutputStream>> {
        let file = fs::File::create(self.path(name))?;
        Ok(Box::new(FsOutputStream {
            inner: Mutex::new(file),
        }))
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn InputStream>> {
        let file = fs::File::open(self.path(name))?;
        let length = file.metadata()?.len();
        Ok(Box::new(FsInputStream { file, length }))
    }

    fn exists(&self, name: &str) -> io::Result<bool> {
        Ok(self.path(name).exists())
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(name))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    fn len(&self, name: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.path(name))?.len())
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

/// Convenience used by tests that just want a directory rooted at a
/// `tempfile::TempDir` without pulling `tempfile` into this crate's
/// non-dev dependencies.
pub fn fs_directory_at(path: &Path) -> io::Result<FsDirectory> {
    FsDirectory::open(path)
}
