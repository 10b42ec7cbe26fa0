//! Storage abstraction for deterministic simulation testing.
//!
//! The `Storage` trait abstracts over byte-addressed persistent storage, so the
//! record store runs on real file I/O in production and on simulated in-memory
//! storage (with fault injection) in tests.
//!
//! # Design
//!
//! The trait is a minimal abstraction over the operations the record store
//! needs:
//! - Positional reads and writes
//! - File synchronization
//! - Growing the underlying storage
//!
//! This allows deterministic simulation testing where we can:
//! - Inject faults at the storage level
//! - Fail a write in the middle of an update and observe the rollback
//! - Simulate torn writes and corruption

use crate::storage::superblock::SuperblockError;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Access beyond the end of storage.
    OutOfBounds { offset: u64, len: usize, size: u64 },
    /// The data region cannot grow any further.
    Exhausted { requested_units: u64, limit_bytes: u64 },
    /// Superblock error.
    Superblock(SuperblockError),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// Corruption detected.
    Corruption(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OutOfBounds { offset, len, size } => write!(
                f,
                "access of {len} bytes at offset {offset} out of bounds (size: {size})"
            ),
            Self::Exhausted {
                requested_units,
                limit_bytes,
            } => write!(
                f,
                "storage exhausted: cannot allocate {requested_units} units within {limit_bytes} bytes"
            ),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SuperblockError> for StorageError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}

/// Abstraction over byte-addressed storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_at` returns the last written content for a byte range
/// - `sync` makes all previous writes durable
/// - `grow` extends the storage with zero bytes
/// - reads and writes past `size()` fail with `OutOfBounds`
pub trait Storage {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write `bytes` starting at `offset`.
    ///
    /// The write may be buffered until `sync` is called.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), StorageError>;

    /// Sync all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), StorageError>;

    /// Current size in bytes.
    fn size(&self) -> u64;

    /// Grow the storage to `new_size` bytes. Shrinking is a no-op.
    fn grow(&mut self, new_size: u64) -> Result<(), StorageError>;
}

/// Check that `[offset, offset + len)` lies inside `size` bytes.
pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> Result<(), StorageError> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::OutOfBounds { offset, len, size }),
    }
}
