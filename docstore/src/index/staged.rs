//! Pending index edits of one operation.

use crate::index::IndexKey;
use crate::types::RecordId;

/// One pending edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedOp {
    /// Map `key` to `id`.
    Insert { key: IndexKey, id: RecordId },
    /// Drop the mapping `key -> id`.
    Remove { key: IndexKey, id: RecordId },
}

/// Edits staged against one unique index, applied together by
/// `UniqueIndex::commit` or discarded by `UniqueIndex::rollback`.
///
/// Staging never touches the index itself, so dropping a `StagedChanges`
/// without committing it has the same effect as a rollback.
#[derive(Debug, Default, PartialEq, Eq)]
#[must_use = "staged changes do nothing unless committed"]
pub struct StagedChanges {
    index: String,
    ops: Vec<StagedOp>,
}

impl StagedChanges {
    /// Empty set of changes for the index named `index`.
    pub fn for_index(index: &str) -> Self {
        Self {
            index: index.to_owned(),
            ops: Vec::new(),
        }
    }

    /// Name of the index these changes belong to.
    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    /// The staged operations, in staging order.
    #[must_use]
    pub fn ops(&self) -> &[StagedOp] {
        &self.ops
    }

    /// Number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn push(&mut self, op: StagedOp) {
        self.ops.push(op);
    }

    pub(crate) fn into_ops(self) -> Vec<StagedOp> {
        self.ops
    }
}
