//! A single collection of documents with unique secondary indexes.
//!
//! `Collection` coordinates the record store and the unique indexes. Every
//! write validates all unique keys before the store is touched:
//!
//! 1. lock the unique indexes (catalog order), then the record store
//! 2. fetch the current document and compute the new one
//! 3. `check_and_stage` every changed key; any conflict aborts with nothing
//!    written
//! 4. write to the record store (in place or relocating)
//! 5. commit the staged index changes, or roll them back if step 4 failed
//!
//! Indexes are derived data. They live in memory and are rebuilt from the
//! recovered documents when a collection is opened, so after a crash they
//! reflect exactly the committed document versions.
//!
//! # Lock order
//!
//! The index catalog `RwLock`, then each index `Mutex` in catalog order,
//! then the record store `Mutex`. Operations that only read documents take
//! the store lock alone.

pub mod error;
pub mod filter;
pub mod validate;

pub use error::CollectionError;
pub use filter::Filter;
pub use validate::{IndexValidation, ValidationReport};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::index::{IndexSpec, StagedChanges, UniqueIndex};
use crate::storage::{
    FileStorage, RecordStore, RecordStoreError, RecordStoreStats, RecoveryResult,
    SimulatedStorage, Storage, UpdateOutcome,
};
use crate::types::{Document, RecordId, SlotLocation};

/// Statistics about a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStats {
    /// Record store statistics.
    pub store: RecordStoreStats,
    /// Per-index statistics, in catalog order.
    pub indexes: Vec<IndexStats>,
}

/// Statistics about one unique index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub name: String,
    pub fields: Vec<String>,
    pub entries: usize,
}

/// A collection of documents over a `Storage` backend.
///
/// `Collection` is `Send + Sync` when the storage is `Send`; share it
/// between threads with `Arc`.
pub struct Collection<S: Storage> {
    indexes: RwLock<Vec<Mutex<UniqueIndex>>>,
    store: Mutex<RecordStore<S>>,
    recovery: RecoveryResult,
}

type IndexGuards<'a> = Vec<MutexGuard<'a, UniqueIndex>>;

impl Collection<FileStorage> {
    /// Create a new collection file at `path`.
    ///
    /// The path must not already exist.
    pub fn create(path: &Path, config: &StoreConfig) -> Result<Self, CollectionError> {
        let storage = FileStorage::create(path)?;
        Self::with_storage(storage, config)
    }

    /// Open an existing collection file, recovering its documents and
    /// rebuilding its indexes.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, CollectionError> {
        let storage = FileStorage::open(path)?;
        Self::with_storage(storage, config)
    }

    /// Open the collection file at `path`, creating it if it doesn't exist.
    pub fn open_or_create(path: &Path, config: &StoreConfig) -> Result<Self, CollectionError> {
        if path.exists() {
            Self::open(path, config)
        } else {
            Self::create(path, config)
        }
    }
}

impl Collection<SimulatedStorage> {
    /// A collection held entirely in memory.
    pub fn in_memory(config: &StoreConfig) -> Result<Self, CollectionError> {
        Self::with_storage(SimulatedStorage::new(0), config)
    }
}

impl<S: Storage> Collection<S> {
    /// Create a collection on empty `storage`, or open the one it holds.
    pub fn with_storage(storage: S, config: &StoreConfig) -> Result<Self, CollectionError> {
        let (mut store, recovery) = if storage.size() == 0 {
            (RecordStore::create(storage, config)?, RecoveryResult::default())
        } else {
            RecordStore::open(storage, config)?
        };
        let indexes = rebuild_indexes(&mut store)?;

        Ok(Self {
            indexes: RwLock::new(indexes),
            store: Mutex::new(store),
            recovery,
        })
    }

    /// What recovery found when the collection was opened.
    #[must_use]
    pub const fn recovery(&self) -> &RecoveryResult {
        &self.recovery
    }

    /// Create a unique index over `fields` named `name`, building it over the
    /// existing documents.
    ///
    /// Returns `Ok(false)` if an identical index already exists.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if existing documents already share a key (the
    /// index is not created), or `IndexSpecConflict` if an index with this
    /// name or these fields exists with a different definition.
    pub fn ensure_unique_index(&self, name: &str, fields: &[&str]) -> Result<bool, CollectionError> {
        let spec = IndexSpec::new(name, fields.iter().map(|f| (*f).to_owned()).collect())?;
        let mut catalog = self.indexes.write()?;

        for slot in catalog.iter_mut() {
            let existing = slot.get_mut()?.spec();
            if *existing == spec {
                debug!(index = name, "Unique index already exists");
                return Ok(false);
            }
            if existing.name() == spec.name() || existing.fields() == spec.fields() {
                return Err(CollectionError::IndexSpecConflict {
                    existing: existing.clone(),
                    requested: spec,
                });
            }
        }

        let mut store = self.store.lock()?;
        let documents = store.scan()?;
        let index = UniqueIndex::build(spec.clone(), documents.iter().map(|(id, doc)| (*id, doc)))
            .map_err(|e| {
                warn!(index = name, error = %e, "Existing documents violate new unique index");
                CollectionError::from(e)
            })?;

        let mut specs = store.index_catalog().to_vec();
        specs.push(spec);
        store.set_index_catalog(specs)?;
        drop(store);

        info!(
            index = name,
            fields = ?fields,
            entries = index.num_entries(),
            "Built unique index"
        );
        catalog.push(Mutex::new(index));
        Ok(true)
    }

    /// Definitions of the unique indexes, in catalog order.
    pub fn indexes(&self) -> Result<Vec<IndexSpec>, CollectionError> {
        let catalog = self.indexes.read()?;
        catalog
            .iter()
            .map(|slot| -> Result<IndexSpec, CollectionError> { Ok(slot.lock()?.spec().clone()) })
            .collect()
    }

    /// Insert a document under a new id.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` or `KeyTooLong` without writing anything, or a
    /// storage error after rolling back the index changes.
    pub fn insert(&self, doc: &Document) -> Result<RecordId, CollectionError> {
        let catalog = self.indexes.read()?;
        let mut indexes = lock_all(&catalog)?;
        let mut store = self.store.lock()?;

        let id = store.next_id();
        let staged = stage_all(&indexes, id, None, Some(doc))?;

        let reserved = store.reserve_id();
        debug_assert_eq!(reserved, id);
        if let Err(e) = store.insert_with_id(id, doc) {
            rollback_all(&indexes, staged);
            warn!(record_id = id.as_u64(), error = %e, "Insert failed, index changes rolled back");
            return Err(e.into());
        }

        commit_all(&mut indexes, staged);
        Ok(id)
    }

    /// Insert `doc` when `id` is `None`, otherwise replace the document
    /// stored under `id`.
    pub fn save(&self, id: Option<RecordId>, doc: &Document) -> Result<RecordId, CollectionError> {
        match id {
            None => self.insert(doc),
            Some(id) => self.update(id, doc).map(|_| id),
        }
    }

    /// Replace the document stored under `id` with `doc`.
    pub fn update(&self, id: RecordId, doc: &Document) -> Result<UpdateOutcome, CollectionError> {
        self.apply_update(id, |_| doc.clone())
    }

    /// Replace the document stored under `id` with `mutator(current)`.
    ///
    /// All unique keys of the new document are validated before the store is
    /// touched. If any index rejects the update, the stored document (bytes
    /// and location) is unchanged, even when the new document would have had
    /// to relocate.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `id` is not live
    /// - `DuplicateKey` or `KeyTooLong` with nothing changed
    /// - a storage error, after rolling back the index changes
    pub fn apply_update<F>(&self, id: RecordId, mutator: F) -> Result<UpdateOutcome, CollectionError>
    where
        F: FnOnce(&Document) -> Document,
    {
        let catalog = self.indexes.read()?;
        let mut indexes = lock_all(&catalog)?;
        let mut store = self.store.lock()?;

        let current = store.fetch(id)?;
        let updated = mutator(&current);
        let staged = stage_all(&indexes, id, Some(&current), Some(&updated))?;

        match store.update(id, &updated) {
            Ok(outcome) => {
                commit_all(&mut indexes, staged);
                debug!(
                    record_id = id.as_u64(),
                    relocated = outcome.relocated,
                    location = %outcome.location,
                    "Applied update"
                );
                Ok(outcome)
            }
            Err(e) => {
                rollback_all(&indexes, staged);
                warn!(record_id = id.as_u64(), error = %e, "Update failed, index changes rolled back");
                Err(e.into())
            }
        }
    }

    /// Delete the document stored under `id`, returning it.
    pub fn delete(&self, id: RecordId) -> Result<Document, CollectionError> {
        let catalog = self.indexes.read()?;
        let mut indexes = lock_all(&catalog)?;
        let mut store = self.store.lock()?;

        let current = store.fetch(id)?;
        let staged = stage_all(&indexes, id, Some(&current), None)?;

        if let Err(e) = store.delete(id) {
            rollback_all(&indexes, staged);
            warn!(record_id = id.as_u64(), error = %e, "Delete failed, index changes rolled back");
            return Err(e.into());
        }

        commit_all(&mut indexes, staged);
        Ok(current)
    }

    /// The document stored under `id`.
    pub fn fetch(&self, id: RecordId) -> Result<Document, CollectionError> {
        Ok(self.store.lock()?.fetch(id)?)
    }

    /// Current slot of `id`, if it is live.
    pub fn location(&self, id: RecordId) -> Result<Option<SlotLocation>, CollectionError> {
        Ok(self.store.lock()?.location(id))
    }

    /// Number of documents matching `filter`.
    pub fn count(&self, filter: &Filter) -> Result<usize, CollectionError> {
        if filter.conditions().is_empty() {
            return Ok(self.store.lock()?.len());
        }
        Ok(self.find(filter)?.len())
    }

    /// Documents matching `filter`, in ascending id order.
    ///
    /// A filter that constrains every field of a unique index is answered
    /// from that index. Anything else scans the collection.
    pub fn find(&self, filter: &Filter) -> Result<Vec<(RecordId, Document)>, CollectionError> {
        let catalog = self.indexes.read()?;
        for slot in catalog.iter() {
            let index = slot.lock()?;
            let Some(key) = filter.index_key(index.spec()) else {
                continue;
            };

            let Some(id) = index.lookup(&key) else {
                return Ok(Vec::new());
            };
            let mut store = self.store.lock()?;
            let doc = match store.fetch(id) {
                Ok(doc) => doc,
                Err(RecordStoreError::RecordNotFound(_)) => {
                    error!(
                        index = index.name(),
                        key = %key.display(index.spec()),
                        record_id = id.as_u64(),
                        "Index entry points at a missing document"
                    );
                    return Err(CollectionError::Corruption(format!(
                        "index {} maps {} to missing document {id}",
                        index.name(),
                        key.display(index.spec())
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            drop(store);
            drop(index);

            return Ok(if filter.matches(&doc) {
                vec![(id, doc)]
            } else {
                Vec::new()
            });
        }

        let mut store = self.store.lock()?;
        let documents = store.scan()?;
        drop(store);
        Ok(documents
            .into_iter()
            .filter(|(_, doc)| filter.matches(doc))
            .collect())
    }

    /// The first document matching `filter`, by id.
    pub fn find_one(&self, filter: &Filter) -> Result<Option<(RecordId, Document)>, CollectionError> {
        Ok(self.find(filter)?.into_iter().next())
    }

    /// Check every unique index against the stored documents.
    ///
    /// Problems are returned in the report and logged at error level; nothing
    /// is repaired.
    pub fn validate(&self) -> Result<ValidationReport, CollectionError> {
        let catalog = self.indexes.read()?;
        let indexes = lock_all(&catalog)?;
        let mut store = self.store.lock()?;

        let documents: BTreeMap<RecordId, Document> = store.scan()?.into_iter().collect();
        drop(store);

        let report = ValidationReport {
            records: documents.len(),
            indexes: indexes
                .iter()
                .map(|index| validate::validate_index(index, &documents))
                .collect(),
        };

        if report.is_valid() {
            info!(
                records = report.records,
                indexes = report.indexes.len(),
                "Collection is consistent"
            );
        } else {
            error!(
                problems = report.problems().count(),
                "Collection failed validation"
            );
        }
        Ok(report)
    }

    /// Current statistics.
    pub fn stats(&self) -> Result<CollectionStats, CollectionError> {
        let catalog = self.indexes.read()?;
        let indexes = catalog
            .iter()
            .map(|slot| -> Result<IndexStats, CollectionError> {
                let index = slot.lock()?;
                Ok(IndexStats {
                    name: index.name().to_owned(),
                    fields: index.spec().fields().to_vec(),
                    entries: index.num_entries(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let store = self.store.lock()?.stats();
        Ok(CollectionStats { store, indexes })
    }

    /// Persist the superblock and sync the storage.
    pub fn sync(&self) -> Result<(), CollectionError> {
        Ok(self.store.lock()?.sync()?)
    }

    /// Run `f` with mutable access to the storage backend, e.g. to inject
    /// faults into a `SimulatedStorage`.
    pub fn with_storage_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, CollectionError> {
        let mut store = self.store.lock()?;
        Ok(f(store.storage_mut()))
    }
}

/// Build every cataloged index over the recovered documents.
fn rebuild_indexes<S: Storage>(
    store: &mut RecordStore<S>,
) -> Result<Vec<Mutex<UniqueIndex>>, CollectionError> {
    let specs = store.index_catalog().to_vec();
    if specs.is_empty() {
        return Ok(Vec::new());
    }
    let documents = store.scan()?;

    specs
        .into_iter()
        .map(|spec| {
            let name = spec.name().to_owned();
            let index = UniqueIndex::build(spec, documents.iter().map(|(id, doc)| (*id, doc)))
                .map_err(|e| {
                    error!(index = %name, error = %e, "Stored documents violate unique index");
                    CollectionError::Corruption(format!("rebuilding index {name}: {e}"))
                })?;
            info!(index = %name, entries = index.num_entries(), "Rebuilt unique index");
            Ok(Mutex::new(index))
        })
        .collect()
}

fn lock_all(catalog: &[Mutex<UniqueIndex>]) -> Result<IndexGuards<'_>, CollectionError> {
    catalog
        .iter()
        .map(|slot| slot.lock().map_err(CollectionError::from))
        .collect()
}

/// Validate and stage the index edits that take `id` from `old` to `new`.
/// `None` stands for "no document" (insert or delete).
///
/// Returns one `StagedChanges` per index, in catalog order. On error every
/// change staged so far is rolled back.
fn stage_all(
    indexes: &[MutexGuard<'_, UniqueIndex>],
    id: RecordId,
    old: Option<&Document>,
    new: Option<&Document>,
) -> Result<Vec<StagedChanges>, CollectionError> {
    let mut all = Vec::with_capacity(indexes.len());

    for index in indexes {
        let mut staged = StagedChanges::for_index(index.name());
        let old_key = old.map(|doc| index.key_for(doc));
        let new_key = new.map(|doc| index.key_for(doc));

        // A document keeping its key maps to itself and never conflicts.
        if old_key != new_key {
            if let Some(key) = new_key {
                if let Err(e) = index.check_and_stage(key, id, &mut staged) {
                    warn!(
                        index = index.name(),
                        record_id = id.as_u64(),
                        error = %e,
                        "Rejected write that violates a unique index"
                    );
                    index.rollback(staged);
                    rollback_all(indexes, all);
                    return Err(e.into());
                }
            }
            if let Some(key) = old_key {
                index.stage_remove(key, id, &mut staged);
            }
        }
        all.push(staged);
    }

    Ok(all)
}

fn rollback_all(indexes: &[MutexGuard<'_, UniqueIndex>], all: Vec<StagedChanges>) {
    for (index, staged) in indexes.iter().zip(all) {
        index.rollback(staged);
    }
}

fn commit_all(indexes: &mut [MutexGuard<'_, UniqueIndex>], all: Vec<StagedChanges>) {
    for (index, staged) in indexes.iter_mut().zip(all) {
        index.commit(staged);
    }
}
