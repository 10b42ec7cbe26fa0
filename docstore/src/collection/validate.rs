//! Full consistency check between documents and unique indexes.

use std::collections::BTreeMap;

use tracing::error;

use crate::index::UniqueIndex;
use crate::types::{Document, RecordId};

/// Outcome of `Collection::validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of live documents checked.
    pub records: usize,
    /// One entry per unique index, in catalog order.
    pub indexes: Vec<IndexValidation>,
}

impl ValidationReport {
    /// Whether no index reported a problem.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.indexes.iter().all(|index| index.problems.is_empty())
    }

    /// Every problem, with the name of the index that reported it.
    pub fn problems(&self) -> impl Iterator<Item = (&str, &str)> {
        self.indexes.iter().flat_map(|index| {
            index
                .problems
                .iter()
                .map(move |problem| (index.name.as_str(), problem.as_str()))
        })
    }
}

/// Validation result for one unique index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexValidation {
    /// Index name.
    pub name: String,
    /// Number of index entries.
    pub entries: usize,
    /// Human-readable descriptions of each inconsistency.
    pub problems: Vec<String>,
}

/// Check `index` against the live documents.
///
/// Every document's key must map to that document, and every entry must
/// point at a live document holding the entry's key. Two documents sharing a
/// key show up as one of them missing its entry.
pub fn validate_index(index: &UniqueIndex, docs: &BTreeMap<RecordId, Document>) -> IndexValidation {
    let spec = index.spec();
    let mut problems = Vec::new();

    for (&id, doc) in docs {
        let key = index.key_for(doc);
        match index.lookup(&key) {
            Some(owner) if owner == id => {}
            Some(owner) => problems.push(format!(
                "{id} holds key {} which the index maps to {owner}",
                key.display(spec)
            )),
            None => problems.push(format!("{id} has no entry for key {}", key.display(spec))),
        }
    }

    for (key, id) in index.entries() {
        match docs.get(&id) {
            None => problems.push(format!(
                "entry {} points at missing document {id}",
                key.display(spec)
            )),
            Some(doc) if index.key_for(doc) != *key => problems.push(format!(
                "entry {} points at {id} which holds {}",
                key.display(spec),
                index.key_for(doc).display(spec)
            )),
            Some(_) => {}
        }
    }

    for problem in &problems {
        error!(index = index.name(), problem = %problem, "Index inconsistency");
    }

    IndexValidation {
        name: index.name().to_owned(),
        entries: index.num_entries(),
        problems,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexSpec, StagedChanges};

    fn docs(entries: &[(u64, i64)]) -> BTreeMap<RecordId, Document> {
        entries
            .iter()
            .map(|&(id, a)| (RecordId(id), Document::new().with("a", a)))
            .collect()
    }

    fn build(docs: &BTreeMap<RecordId, Document>) -> UniqueIndex {
        UniqueIndex::build(
            IndexSpec::single("a_1", "a"),
            docs.iter().map(|(id, doc)| (*id, doc)),
        )
        .expect("build")
    }

    #[test]
    fn test_consistent_index_has_no_problems() {
        let docs = docs(&[(1, 1), (2, 2)]);
        let result = validate_index(&build(&docs), &docs);
        assert_eq!(result.entries, 2);
        assert!(result.problems.is_empty());
    }

    #[test]
    fn test_missing_entry_and_dangling_entry() {
        let indexed = docs(&[(1, 1), (2, 2)]);
        let index = build(&indexed);

        // Document 2 changed without the index hearing about it, and
        // document 3 was never indexed.
        let live = docs(&[(1, 1), (2, 5), (3, 3)]);
        let result = validate_index(&index, &live);
        assert_eq!(result.problems.len(), 3, "{:?}", result.problems);

        let gone = docs(&[(1, 1)]);
        let result = validate_index(&index, &gone);
        assert_eq!(result.problems.len(), 1);
        assert!(result.problems[0].contains("missing document RecordId(2)"));
    }

    #[test]
    fn test_shared_key_is_reported() {
        let mut index = UniqueIndex::new(IndexSpec::single("a_1", "a"));
        let mut staged = StagedChanges::for_index("a_1");
        index
            .check_and_stage(index.key_for(&Document::new().with("a", 1)), RecordId(1), &mut staged)
            .expect("stage");
        index.commit(staged);

        let live = docs(&[(1, 1), (2, 1)]);
        let result = validate_index(&index, &live);
        assert_eq!(result.problems.len(), 1);
        assert!(result.problems[0].contains("maps to RecordId(1)"));
    }

    #[test]
    fn test_report_collects_problems() {
        let report = ValidationReport {
            records: 1,
            indexes: vec![
                IndexValidation {
                    name: "a_1".into(),
                    entries: 1,
                    problems: Vec::new(),
                },
                IndexValidation {
                    name: "b_1".into(),
                    entries: 0,
                    problems: vec!["RecordId(1) has no entry for key { b: null }".into()],
                },
            ],
        };
        assert!(!report.is_valid());
        assert_eq!(report.problems().count(), 1);
        assert_eq!(report.problems().next().map(|(name, _)| name), Some("b_1"));
    }
}
