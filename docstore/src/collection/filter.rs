//! Equality filters for `count` and `find`.
//!
//! A filter is a conjunction of `field == value` conditions. Values compare
//! the way index keys do, so `Int(1)` matches `Double(1.0)` and a condition
//! on `Null` matches documents that lack the field.

use std::cmp::Ordering;

use crate::index::{IndexKey, IndexSpec, compare_values};
use crate::types::{Document, Value};

/// A conjunction of equality conditions. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// The filter that matches every document.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Filter on `field == value`.
    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    /// Add the condition `field == value`. A later condition on the same
    /// field replaces the earlier one.
    #[must_use]
    pub fn and_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if let Some(slot) = self.conditions.iter_mut().find(|(name, _)| name == field) {
            slot.1 = value;
        } else {
            self.conditions.push((field.to_owned(), value));
        }
        self
    }

    /// The conditions in the order they were added.
    #[must_use]
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Whether `doc` satisfies every condition.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            let actual = doc.get(field).unwrap_or(&Value::Null);
            compare_values(actual, expected) == Ordering::Equal
        })
    }

    fn value_of(&self, field: &str) -> Option<&Value> {
        self.conditions
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// The key to look up in `spec`'s index, if the filter constrains every
    /// field of the index.
    pub(crate) fn index_key(&self, spec: &IndexSpec) -> Option<IndexKey> {
        spec.fields()
            .iter()
            .map(|field| self.value_of(field).cloned())
            .collect::<Option<Vec<_>>>()
            .map(IndexKey::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::all().matches(&Document::new()));
        assert!(Filter::all().matches(&Document::new().with("a", 1)));
    }

    #[test]
    fn test_equality_uses_numeric_comparison() {
        let filter = Filter::eq("a", 1);
        assert!(filter.matches(&Document::new().with("a", 1.0)));
        assert!(!filter.matches(&Document::new().with("a", 2)));
        assert!(!filter.matches(&Document::new().with("a", "1")));
    }

    #[test]
    fn test_null_matches_missing_field() {
        let filter = Filter::eq("a", Value::Null);
        assert!(filter.matches(&Document::new().with("b", 1)));
        assert!(!filter.matches(&Document::new().with("a", 1)));
    }

    #[test]
    fn test_conjunction() {
        let filter = Filter::eq("a", 1).and_eq("b", "x");
        assert!(filter.matches(&Document::new().with("a", 1).with("b", "x")));
        assert!(!filter.matches(&Document::new().with("a", 1).with("b", "y")));
    }

    #[test]
    fn test_repeated_field_replaces_condition() {
        let filter = Filter::eq("a", 1).and_eq("a", 2);
        assert_eq!(filter.conditions().len(), 1);
        assert!(filter.matches(&Document::new().with("a", 2)));
    }

    #[test]
    fn test_index_key_requires_every_field() {
        let spec = IndexSpec::new("a_1_b_1", vec!["a".into(), "b".into()]).expect("spec");
        assert!(Filter::eq("a", 1).index_key(&spec).is_none());

        let key = Filter::eq("b", 2)
            .and_eq("a", 1)
            .and_eq("c", 3)
            .index_key(&spec)
            .expect("covered");
        assert_eq!(key.values(), &[Value::Int(1), Value::Int(2)]);
    }
}
