//! File manager: the single point of access for engine file I/O.
//!
//! Writers are plain buffered OS files. Readers are read-only memory
//! mappings deduplicated by path, so every caller of
//! [`FileManager::open_for_read`] on the same path shares one mapping.
//! Deleting a path unlinks the directory entry immediately; the OS keeps
//! the inode alive until the last mapping holder drops.

use std::collections::HashMap;
use std::fs;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use memmap::{Mmap, MmapOptions};

use crate::error::StrataError;
use crate::Result;

static GLOBAL_FILE_MANAGER: OnceLock<FileManager> = OnceLock::new();

pub struct FileManager {
    readers: Mutex<HashMap<PathBuf, Arc<FileReader>>>,
}

impl FileManager {
    pub fn new() -> FileManager {
        FileManager {
            readers: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide instance used by the engine. Tests that need
    /// isolation can construct their own with [`FileManager::new`].
    pub fn global() -> &'static FileManager {
        GLOBAL_FILE_MANAGER.get_or_init(FileManager::new)
    }

    /// Creates parent directories, truncates `path` and returns a writer.
    pub fn open_for_write(&self, path: &Path) -> Result<FileWriter> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FileWriter {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Creates parent directories and opens `path` for appending.
    pub fn open_for_append(&self, path: &Path) -> Result<FileWriter> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(FileWriter {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns the shared mmap-backed reader for `path`. Repeated calls
    /// with the same path return the same instance.
    pub fn open_for_read(&self, path: &Path) -> Result<Arc<FileReader>> {
        let mut readers = self.readers.lock().unwrap();
        if let Some(reader) = readers.get(path) {
            return Ok(reader.clone());
        }
        let reader = Arc::new(FileReader::open(path)?);
        readers.insert(path.to_path_buf(), reader.clone());
        Ok(reader)
    }

    /// Unlinks `path` and drops the manager's shared reader, if any.
    /// Holders of the old reader keep a valid mapping until they drop it.
    pub fn delete(&self, path: &Path) -> Result<()> {
        self.readers.lock().unwrap().remove(path);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StrataError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the cached reader for `path` without unlinking it. The next
    /// `open_for_read` maps the file at its current length.
    pub(crate) fn evict(&self, path: &Path) {
        self.readers.lock().unwrap().remove(path);
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl Default for FileManager {
    fn default() -> FileManager {
        FileManager::new()
    }
}

pub struct FileWriter {
    file: File,
    path: PathBuf,
}

impl FileWriter {
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    /// fsync.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Direct handle for codecs that need `Seek + Write`.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn into_file(self) -> File {
        self.file
    }

    pub fn try_clone_file(&self) -> Result<File> {
        Ok(self.file.try_clone()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read-only view of a file, mapped at its length when opened. Empty
/// files carry no mapping and expose an empty payload.
#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    mmap: Option<Mmap>,
}

impl FileReader {
    fn open(path: &Path) -> Result<FileReader> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StrataError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { MmapOptions::new().map(&file)? })
        };
        Ok(FileReader {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn payload(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
