//! Slot-based record storage engine.
//!
//! A single data file holds a collection's documents in variable-size slots.
//!
//! # File Format
//!
//! - Bytes 0-4095: Superblock (format metadata and the unique index catalog)
//! - Remaining bytes: 32-byte allocation units, grouped into slots
//!
//! Each slot starts with a header carrying the record id, a version and a
//! checksum, so the id -> location table and the free map are rebuilt by a
//! scan at open instead of being stored.
//!
//! # Usage
//!
//! ```ignore
//! use storage::{FileStorage, RecordStore};
//!
//! let storage = FileStorage::create(path)?;
//! let mut store = RecordStore::create(storage, &config)?;
//!
//! let id = store.insert(&doc)?;
//! let outcome = store.update(id, &bigger_doc)?;
//! assert_eq!(store.fetch(id)?, bigger_doc);
//!
//! store.sync()?;
//! ```

pub mod allocator;
pub mod file;
pub mod io;
pub mod record_store;
pub mod recovery;
pub mod simulated;
pub mod slot;
pub mod superblock;

pub use allocator::{AllocationPolicy, UnitAllocator};
pub use file::{FileError, FileStorage};
pub use io::{Storage, StorageError};
pub use record_store::{RecordStore, RecordStoreError, RecordStoreStats, UpdateOutcome};
pub use recovery::RecoveryResult;
pub use simulated::{FaultConfig, SimulatedStorage, SimulatedStorageStats};
pub use slot::{UNIT_SIZE, UNIT_SIZE_U64};
pub use superblock::{Superblock, SuperblockError};
