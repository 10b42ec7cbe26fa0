//! Invariant checking for simulation runs.
//!
//! The simulator keeps a `Model` of what the collection should contain and
//! compares the collection against it after every operation.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::collection::{Collection, Filter};
use crate::index::{IndexKey, IndexSpec};
use crate::storage::Storage;
use crate::types::{Document, RecordId};

/// An invariant that did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Operation number after which the check failed.
    pub operation: usize,
    pub message: String,
}

/// Expected contents of the collection.
#[derive(Debug, Default, Clone)]
pub struct Model {
    docs: BTreeMap<RecordId, Document>,
    specs: Vec<IndexSpec>,
}

impl Model {
    #[must_use]
    pub const fn new(specs: Vec<IndexSpec>) -> Self {
        Self {
            docs: BTreeMap::new(),
            specs,
        }
    }

    /// The live id at position `pick` (modulo the number of documents).
    #[must_use]
    pub fn pick(&self, pick: usize) -> Option<RecordId> {
        if self.docs.is_empty() {
            return None;
        }
        self.docs.keys().nth(pick % self.docs.len()).copied()
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&Document> {
        self.docs.get(&id)
    }

    /// The index and the other document that would make `doc` a duplicate if
    /// stored under `id` (`None` for a new document).
    #[must_use]
    pub fn conflict(&self, id: Option<RecordId>, doc: &Document) -> Option<(String, RecordId)> {
        for spec in &self.specs {
            let key = IndexKey::extract(spec, doc);
            for (&other, existing) in &self.docs {
                if Some(other) != id && IndexKey::extract(spec, existing) == key {
                    return Some((spec.name().to_owned(), other));
                }
            }
        }
        None
    }

    pub fn put(&mut self, id: RecordId, doc: Document) {
        self.docs.insert(id, doc);
    }

    pub fn remove(&mut self, id: RecordId) {
        self.docs.remove(&id);
    }

    /// Number of expected documents matching `filter`.
    #[must_use]
    pub fn count(&self, filter: &Filter) -> usize {
        self.docs.values().filter(|doc| filter.matches(doc)).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Compares a collection with its model.
pub struct InvariantChecker;

impl InvariantChecker {
    /// Check the invariants that are cheap enough to run after every
    /// operation.
    pub fn check<S: Storage>(
        collection: &Collection<S>,
        model: &Model,
        operation: usize,
    ) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let mut violation = |message: String| {
            violations.push(InvariantViolation { operation, message });
        };

        let docs = match collection.find(&Filter::all()) {
            Ok(docs) => docs,
            Err(e) => {
                violation(format!("scan failed: {e}"));
                return violations;
            }
        };

        if docs.len() != model.len() {
            violation(format!(
                "collection holds {} documents, expected {}",
                docs.len(),
                model.len()
            ));
        }
        for (id, doc) in &docs {
            match model.get(*id) {
                Some(expected) if expected == doc => {}
                Some(expected) => violation(format!("{id} holds {doc}, expected {expected}")),
                None => violation(format!("{id} should not exist")),
            }
        }

        // No two live documents share a key in any unique index.
        for spec in &model.specs {
            let mut seen: BTreeMap<IndexKey, RecordId> = BTreeMap::new();
            for (id, doc) in &docs {
                match seen.entry(IndexKey::extract(spec, doc)) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(*id);
                    }
                    Entry::Occupied(occupied) => violation(format!(
                        "{id} and {} share key {} in {}",
                        occupied.get(),
                        occupied.key().display(spec),
                        spec.name()
                    )),
                }
            }
        }

        match collection.stats() {
            Ok(stats) => {
                for index in &stats.indexes {
                    if index.entries != docs.len() {
                        violation(format!(
                            "index {} has {} entries for {} documents",
                            index.name,
                            index.entries,
                            docs.len()
                        ));
                    }
                }
            }
            Err(e) => violation(format!("stats failed: {e}")),
        }

        violations
    }

    /// `check` plus a full index validation.
    pub fn check_full<S: Storage>(
        collection: &Collection<S>,
        model: &Model,
        operation: usize,
    ) -> Vec<InvariantViolation> {
        let mut violations = Self::check(collection, model, operation);
        match collection.validate() {
            Ok(report) => violations.extend(report.problems().map(|(index, problem)| {
                InvariantViolation {
                    operation,
                    message: format!("index {index}: {problem}"),
                }
            })),
            Err(e) => violations.push(InvariantViolation {
                operation,
                message: format!("validate failed: {e}"),
            }),
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_conflict_ignores_own_id() {
        let mut model = Model::new(vec![IndexSpec::single("a_1", "a")]);
        model.put(RecordId(1), Document::new().with("a", 1));

        assert!(model.conflict(Some(RecordId(1)), &Document::new().with("a", 1)).is_none());
        assert_eq!(
            model.conflict(None, &Document::new().with("a", 1.0)),
            Some(("a_1".to_string(), RecordId(1)))
        );
    }

    #[test]
    fn test_model_pick_wraps() {
        let mut model = Model::new(Vec::new());
        assert_eq!(model.pick(3), None);
        model.put(RecordId(4), Document::new());
        model.put(RecordId(9), Document::new());
        assert_eq!(model.pick(0), Some(RecordId(4)));
        assert_eq!(model.pick(3), Some(RecordId(9)));
    }
}
