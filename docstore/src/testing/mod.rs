//! Shared helpers for tests.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::index::IndexSpec;
use crate::storage::{SimulatedStorage, Storage, UNIT_SIZE};
use crate::storage::record_store::unit_offset;
use crate::types::RecordId;

/// A temporary directory and a collection file path inside it. The
/// directory is removed when the returned `TempDir` is dropped.
pub fn temp_collection_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("collection.db");
    (dir, path)
}

/// An in-memory collection with a unique index `<field>_1` on each field.
pub fn memory_collection(unique_fields: &[&str]) -> Collection<SimulatedStorage> {
    let collection = Collection::in_memory(&StoreConfig::default()).expect("in-memory collection");
    for &field in unique_fields {
        collection
            .ensure_unique_index(&IndexSpec::default_name(&[field]), &[field])
            .expect("create unique index");
    }
    collection
}

/// The raw bytes of the slot currently holding `id`.
pub fn slot_bytes<S: Storage>(collection: &Collection<S>, id: RecordId) -> Vec<u8> {
    let location = collection
        .location(id)
        .expect("location")
        .expect("record is live");
    let len = location.units as usize * UNIT_SIZE;
    collection
        .with_storage_mut(|storage| {
            let mut buf = vec![0u8; len];
            storage
                .read_at(unit_offset(location.first_unit), &mut buf)
                .expect("read slot");
            buf
        })
        .expect("storage access")
}
