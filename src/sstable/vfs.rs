//! File systems a table image can be opened from.
//!
//! - [`DiskFs`] memory-maps a file on disk.
//! - [`MemFs`] keeps whole files in memory. Files are written through a
//!   [`MemFile`] and become visible to [`FileSystem::open`] once closed.
//!
//! Either way the reader gets a [`TableSource`]: an immutable byte image it
//! can borrow keys and values from.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, Write},
    ops::Deref,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use memmap2::Mmap;

/// Immutable bytes of one table file.
pub enum TableSource {
    /// Read-only memory map of an on-disk file.
    Mapped(Mmap),
    /// Buffer shared with the in-memory file system.
    Memory(Arc<[u8]>),
}

impl Deref for TableSource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => &mmap[..],
            Self::Memory(bytes) => &bytes[..],
        }
    }
}

impl std::fmt::Debug for TableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Mapped(_) => "Mapped",
            Self::Memory(_) => "Memory",
        };
        f.debug_struct("TableSource")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

/// Opens table files for reading.
pub trait FileSystem {
    /// Opens `path` and returns its full contents.
    fn open(&self, path: &Path) -> io::Result<TableSource>;
}

// ------------------------------------------------------------------------------------------------
// DiskFs
// ------------------------------------------------------------------------------------------------

/// The local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFs;

impl FileSystem for DiskFs {
    /// Memory-maps `path` read-only.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`. Table files are immutable once
    /// written; modifying one while it is open is outside the contract.
    fn open(&self, path: &Path) -> io::Result<TableSource> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(TableSource::Memory(Arc::from(Vec::new())));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(TableSource::Mapped(mmap))
    }
}

// ------------------------------------------------------------------------------------------------
// MemFs
// ------------------------------------------------------------------------------------------------

/// An in-memory file system. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    files: Arc<Mutex<HashMap<PathBuf, Arc<[u8]>>>>,
}

impl MemFs {
    /// Creates an empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or truncates) `path`. The contents are published on
    /// [`MemFile::close`].
    pub fn create(&self, path: impl AsRef<Path>) -> io::Result<MemFile> {
        Ok(MemFile {
            fs: self.clone(),
            path: path.as_ref().to_path_buf(),
            buf: Vec::new(),
        })
    }

    fn publish(&self, path: PathBuf, contents: Vec<u8>) -> io::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("memfs lock poisoned"))?;
        files.insert(path, Arc::from(contents));
        Ok(())
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &Path) -> io::Result<TableSource> {
        let files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("memfs lock poisoned"))?;
        files
            .get(path)
            .map(|bytes| TableSource::Memory(Arc::clone(bytes)))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("memfs: {} not found", path.display()),
                )
            })
    }
}

/// A file being written into a [`MemFs`].
#[derive(Debug)]
pub struct MemFile {
    fs: MemFs,
    path: PathBuf,
    buf: Vec<u8>,
}

impl MemFile {
    /// Publishes the written bytes under the file's path.
    pub fn close(self) -> io::Result<()> {
        self.fs.publish(self.path, self.buf)
    }
}

impl Write for MemFile {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
