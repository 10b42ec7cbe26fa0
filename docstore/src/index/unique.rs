//! Unique index implementation.
//!
//! The unique index maps an `IndexKey` to the id of the one document holding
//! that key. It is backed by an in-memory B-tree map.
//!
//! Writers never edit the map directly. They validate and stage edits with
//! `check_and_stage`/`stage_remove`, perform the storage write, then either
//! `commit` the staged edits or `rollback` them. The caller holds the index
//! lock from the first check until commit or rollback, so no other writer can
//! claim a checked key in between.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::{debug, error};

use crate::index::{IndexKey, IndexSpec, MAX_KEY_SIZE, StagedChanges, StagedOp};
use crate::types::{Document, RecordId};

/// Error code reported with duplicate key errors.
pub const DUPLICATE_KEY_CODE: u32 = 11000;

/// A unique index over one or more document fields.
///
/// # Invariants
///
/// - A key maps to at most one id.
/// - Committed entries are exactly the keys of the indexed documents.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    spec: IndexSpec,
    entries: BTreeMap<IndexKey, RecordId>,
}

impl UniqueIndex {
    /// Create an empty index.
    #[must_use]
    pub const fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    /// Build an index over existing documents.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate key, or a key that is too long.
    pub fn build<'a, I>(spec: IndexSpec, documents: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (RecordId, &'a Document)>,
    {
        let mut index = Self::new(spec);
        for (id, doc) in documents {
            let key = index.key_for(doc);
            index.check_key_size(&key)?;
            match index.entries.entry(key) {
                Entry::Vacant(vacant) => {
                    vacant.insert(id);
                }
                Entry::Occupied(occupied) => {
                    return Err(IndexError::DuplicateKey(DuplicateKeyError {
                        index: index.spec.clone(),
                        key: occupied.key().clone(),
                        existing: *occupied.get(),
                    }));
                }
            }
        }
        Ok(index)
    }

    /// The index definition.
    #[must_use]
    pub const fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// The index name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// Key of `doc` in this index.
    #[must_use]
    pub fn key_for(&self, doc: &Document) -> IndexKey {
        IndexKey::extract(&self.spec, doc)
    }

    /// Reject keys whose encoded form exceeds `MAX_KEY_SIZE`.
    pub fn check_key_size(&self, key: &IndexKey) -> Result<(), IndexError> {
        let size = key.encoded_size();
        if size > MAX_KEY_SIZE {
            return Err(IndexError::KeyTooLong {
                index: self.name().to_owned(),
                size,
                max: MAX_KEY_SIZE,
            });
        }
        Ok(())
    }

    /// Check whether `id` may hold `key` without staging anything.
    ///
    /// Ok if the key is absent or already maps to `id`.
    pub fn dup_key_check(&self, key: &IndexKey, id: RecordId) -> Result<(), DuplicateKeyError> {
        match self.entries.get(key) {
            Some(&existing) if existing != id => Err(DuplicateKeyError {
                index: self.spec.clone(),
                key: key.clone(),
                existing,
            }),
            _ => Ok(()),
        }
    }

    /// Validate that `id` may hold `key` and stage the mapping.
    ///
    /// On error nothing is staged.
    ///
    /// # Pre-conditions
    ///
    /// - `staged` was created for this index
    /// - the caller holds this index's lock until `commit` or `rollback`
    pub fn check_and_stage(
        &self,
        key: IndexKey,
        id: RecordId,
        staged: &mut StagedChanges,
    ) -> Result<(), IndexError> {
        self.check_key_size(&key)?;
        self.dup_key_check(&key, id)?;
        staged.push(StagedOp::Insert { key, id });
        Ok(())
    }

    /// Stage removal of `id`'s superseded key.
    pub fn stage_remove(&self, key: IndexKey, id: RecordId, staged: &mut StagedChanges) {
        debug_assert_eq!(staged.index(), self.name());
        staged.push(StagedOp::Remove { key, id });
    }

    /// Apply staged changes: removals first, then insertions.
    ///
    /// # Panics
    ///
    /// Panics if an insertion would map a key to a second id. That can only
    /// happen if the caller did not hold the index lock across check and
    /// commit, which is a programming error.
    pub fn commit(&mut self, staged: StagedChanges) {
        assert_eq!(
            staged.index(),
            self.name(),
            "staged changes committed to the wrong index"
        );
        let ops = staged.into_ops();
        let count = ops.len();
        let (removes, inserts): (Vec<_>, Vec<_>) = ops
            .into_iter()
            .partition(|op| matches!(op, StagedOp::Remove { .. }));

        for op in removes {
            if let StagedOp::Remove { key, id } = op {
                match self.entries.get(&key) {
                    Some(&owner) if owner == id => {
                        self.entries.remove(&key);
                    }
                    owner => error!(
                        index = self.name(),
                        key = %key.display(&self.spec),
                        record_id = id.as_u64(),
                        owner = ?owner,
                        "Staged removal of a key not owned by the record"
                    ),
                }
            }
        }

        for op in inserts {
            if let StagedOp::Insert { key, id } = op {
                match self.entries.entry(key) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(id);
                    }
                    Entry::Occupied(occupied) => {
                        assert_eq!(
                            *occupied.get(),
                            id,
                            "unique index {} would map {} to two records",
                            self.spec.name(),
                            occupied.key().display(&self.spec)
                        );
                    }
                }
            }
        }

        debug!(index = self.name(), ops = count, "Committed staged index changes");
    }

    /// Discard staged changes. The index is unchanged.
    pub fn rollback(&self, staged: StagedChanges) {
        let discarded = staged.into_ops().len();
        debug!(index = self.name(), ops = discarded, "Rolled back staged index changes");
    }

    /// Id of the document holding `key`.
    #[must_use]
    pub fn lookup(&self, key: &IndexKey) -> Option<RecordId> {
        self.entries.get(key).copied()
    }

    /// Number of entries.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&IndexKey, RecordId)> + '_ {
        self.entries.iter().map(|(key, &id)| (key, id))
    }
}

/// A key is already held by another document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKeyError {
    /// Index that rejected the key.
    pub index: IndexSpec,
    /// The conflicting key.
    pub key: IndexKey,
    /// Document that already holds the key.
    pub existing: RecordId,
}

impl DuplicateKeyError {
    /// Name of the index that rejected the key.
    #[must_use]
    pub fn index_name(&self) -> &str {
        self.index.name()
    }
}

impl std::fmt::Display for DuplicateKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "E{DUPLICATE_KEY_CODE} duplicate key error index: {} dup key: {}",
            self.index.name(),
            self.key.display(&self.index)
        )
    }
}

impl std::error::Error for DuplicateKeyError {}

/// Errors from unique index checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The key is held by another document.
    DuplicateKey(DuplicateKeyError),
    /// The encoded key exceeds `MAX_KEY_SIZE`.
    KeyTooLong { index: String, size: usize, max: usize },
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey(e) => write!(f, "{e}"),
            Self::KeyTooLong { index, size, max } => write!(
                f,
                "key too large to index: index {index} key of {size} bytes exceeds {max} bytes"
            ),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DuplicateKey(e) => Some(e),
            Self::KeyTooLong { .. } => None,
        }
    }
}

impl From<DuplicateKeyError> for IndexError {
    fn from(e: DuplicateKeyError) -> Self {
        Self::DuplicateKey(e)
    }
}
