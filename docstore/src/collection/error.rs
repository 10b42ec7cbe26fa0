//! Collection error type.

use std::sync::PoisonError;

use crate::index::{DuplicateKeyError, IndexError, IndexSpec, IndexSpecError};
use crate::storage::{FileError, RecordStoreError, StorageError};
use crate::types::RecordId;

/// Errors that can occur during collection operations.
#[derive(Debug)]
pub enum CollectionError {
    /// A unique index already holds the key for another document. Nothing
    /// was changed.
    DuplicateKey(DuplicateKeyError),
    /// A key is too large to index. Nothing was changed.
    KeyTooLong { index: String, size: usize, max: usize },
    /// No document with this id.
    NotFound(RecordId),
    /// Record store error.
    RecordStore(RecordStoreError),
    /// Storage error.
    Storage(StorageError),
    /// Indexes and documents disagree.
    Corruption(String),
    /// A thread panicked while holding a collection lock.
    LockPoisoned,
    /// An index with this name or these fields exists with another definition.
    IndexSpecConflict {
        existing: IndexSpec,
        requested: IndexSpec,
    },
    /// The index definition is invalid.
    InvalidIndexSpec(IndexSpecError),
}

impl CollectionError {
    /// Whether this is a duplicate key rejection.
    #[must_use]
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

impl std::fmt::Display for CollectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey(e) => write!(f, "{e}"),
            Self::KeyTooLong { index, size, max } => write!(
                f,
                "key too large to index: index {index} key of {size} bytes exceeds {max} bytes"
            ),
            Self::NotFound(id) => write!(f, "document not found: {id}"),
            Self::RecordStore(e) => write!(f, "record store error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::LockPoisoned => write!(f, "collection lock poisoned"),
            Self::IndexSpecConflict {
                existing,
                requested,
            } => write!(
                f,
                "index {} on {:?} conflicts with existing index {} on {:?}",
                requested.name(),
                requested.fields(),
                existing.name(),
                existing.fields()
            ),
            Self::InvalidIndexSpec(e) => write!(f, "invalid index definition: {e}"),
        }
    }
}

impl std::error::Error for CollectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DuplicateKey(e) => Some(e),
            Self::RecordStore(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::InvalidIndexSpec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DuplicateKeyError> for CollectionError {
    fn from(e: DuplicateKeyError) -> Self {
        Self::DuplicateKey(e)
    }
}

impl From<IndexError> for CollectionError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::DuplicateKey(e) => Self::DuplicateKey(e),
            IndexError::KeyTooLong { index, size, max } => Self::KeyTooLong { index, size, max },
        }
    }
}

impl From<RecordStoreError> for CollectionError {
    fn from(e: RecordStoreError) -> Self {
        match e {
            RecordStoreError::RecordNotFound(id) => Self::NotFound(id),
            RecordStoreError::Storage(e) => Self::Storage(e),
            other => Self::RecordStore(other),
        }
    }
}

impl From<StorageError> for CollectionError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<FileError> for CollectionError {
    fn from(e: FileError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<IndexSpecError> for CollectionError {
    fn from(e: IndexSpecError) -> Self {
        Self::InvalidIndexSpec(e)
    }
}

impl<T> From<PoisonError<T>> for CollectionError {
    fn from(_: PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_not_found_maps_to_not_found() {
        let e = CollectionError::from(RecordStoreError::RecordNotFound(RecordId(4)));
        assert!(matches!(e, CollectionError::NotFound(RecordId(4))));
        assert_eq!(e.to_string(), "document not found: RecordId(4)");
    }

    #[test]
    fn test_storage_error_is_unwrapped() {
        let e = CollectionError::from(RecordStoreError::Storage(StorageError::InjectedFault(
            "boom".to_string(),
        )));
        assert!(matches!(e, CollectionError::Storage(_)));
        assert!(!e.is_duplicate_key());
    }

    #[test]
    fn test_key_too_long_display() {
        let e = CollectionError::from(IndexError::KeyTooLong {
            index: "a_1".to_string(),
            size: 2000,
            max: 1024,
        });
        assert!(e.to_string().contains("a_1"));
        assert!(e.to_string().contains("2000"));
    }
}
