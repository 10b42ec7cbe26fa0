//! Data file I/O operations.
//!
//! `FileStorage` implements `Storage` on top of a single `std::fs::File`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::io::{Storage, StorageError, check_bounds};

/// A data file handle with positional byte I/O.
pub struct FileStorage {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileStorage {
    /// Create a new, empty data file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size: 0,
        })
    }

    /// Open an existing data file.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;
        let size = file.metadata().map_err(FileError::Io)?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.size)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.size)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn grow(&mut self, new_size: u64) -> Result<(), StorageError> {
        if new_size <= self.size {
            return Ok(());
        }
        self.file.set_len(new_size)?;
        self.size = new_size;
        Ok(())
    }
}

/// Errors that can occur when creating or opening a data file.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists (when creating).
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(path) => write!(f, "file already exists: {}", path.display()),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::AlreadyExists(_) => None,
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(e) => Self::Io(e),
            FileError::AlreadyExists(path) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )),
        }
    }
}
