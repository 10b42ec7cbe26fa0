//! Unique secondary indexes.
//!
//! A unique index maps the key extracted from a document (the values of one
//! or more fields) to the id of the single document holding that key:
//! - `key` - `IndexKey` extraction and the total order over keys
//! - `staged` - `StagedChanges`, the pending edits of one operation
//! - `unique` - `UniqueIndex` with check/stage/commit/rollback
//!
//! Indexes live in memory. The definitions are persisted in the data file's
//! catalog and the entries are rebuilt from the documents at open.

pub mod key;
pub mod staged;
pub mod unique;

pub use key::{IndexKey, MAX_KEY_SIZE, compare_values};
pub use staged::{StagedChanges, StagedOp};
pub use unique::{DuplicateKeyError, IndexError, UniqueIndex};

/// Longest index or field name accepted in a definition.
pub const MAX_NAME_LEN: usize = 255;

/// Definition of a unique index: a name and the indexed fields, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    name: String,
    fields: Vec<String>,
}

impl IndexSpec {
    /// Create a validated index definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or a field is empty or too long, if no
    /// field is given, or if a field is listed twice.
    pub fn new(name: &str, fields: Vec<String>) -> Result<Self, IndexSpecError> {
        if name.is_empty() {
            return Err(IndexSpecError::EmptyName);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(IndexSpecError::NameTooLong(name.len()));
        }
        if fields.is_empty() {
            return Err(IndexSpecError::NoFields);
        }
        for (i, field) in fields.iter().enumerate() {
            if field.is_empty() {
                return Err(IndexSpecError::EmptyFieldName);
            }
            if field.len() > MAX_NAME_LEN {
                return Err(IndexSpecError::NameTooLong(field.len()));
            }
            if fields[..i].contains(field) {
                return Err(IndexSpecError::DuplicateField(field.clone()));
            }
        }

        Ok(Self {
            name: name.to_owned(),
            fields,
        })
    }

    /// Single-field index definition.
    ///
    /// # Pre-conditions
    ///
    /// - `name` and `field` are non-empty and at most `MAX_NAME_LEN` bytes
    #[must_use]
    pub fn single(name: &str, field: &str) -> Self {
        Self {
            name: name.to_owned(),
            fields: vec![field.to_owned()],
        }
    }

    /// Conventional name for an index over `fields`, e.g. `a_1_b_1`.
    #[must_use]
    pub fn default_name(fields: &[&str]) -> String {
        fields
            .iter()
            .map(|f| format!("{f}_1"))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Indexed fields, in key order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Errors in an index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpecError {
    /// Index name is empty.
    EmptyName,
    /// A name exceeds `MAX_NAME_LEN` bytes.
    NameTooLong(usize),
    /// No fields listed.
    NoFields,
    /// A field name is empty.
    EmptyFieldName,
    /// A field is listed more than once.
    DuplicateField(String),
}

impl std::fmt::Display for IndexSpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "index name must not be empty"),
            Self::NameTooLong(len) => {
                write!(f, "name of {len} bytes exceeds maximum of {MAX_NAME_LEN} bytes")
            }
            Self::NoFields => write!(f, "index must have at least one field"),
            Self::EmptyFieldName => write!(f, "field name must not be empty"),
            Self::DuplicateField(field) => write!(f, "field listed twice: {field}"),
        }
    }
}

impl std::error::Error for IndexSpecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_spec() {
        let spec = IndexSpec::new("a_1_b_1", vec!["a".into(), "b".into()]).expect("valid");
        assert_eq!(spec.name(), "a_1_b_1");
        assert_eq!(spec.fields(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_invalid_specs() {
        assert_eq!(
            IndexSpec::new("", vec!["a".into()]),
            Err(IndexSpecError::EmptyName)
        );
        assert_eq!(IndexSpec::new("x", vec![]), Err(IndexSpecError::NoFields));
        assert_eq!(
            IndexSpec::new("x", vec![String::new()]),
            Err(IndexSpecError::EmptyFieldName)
        );
        assert_eq!(
            IndexSpec::new("x", vec!["a".into(), "a".into()]),
            Err(IndexSpecError::DuplicateField("a".into()))
        );
        assert!(matches!(
            IndexSpec::new(&"n".repeat(300), vec!["a".into()]),
            Err(IndexSpecError::NameTooLong(300))
        ));
    }

    #[test]
    fn test_default_name() {
        assert_eq!(IndexSpec::default_name(&["a"]), "a_1");
        assert_eq!(IndexSpec::default_name(&["a", "b"]), "a_1_b_1");
    }

    #[test]
    fn test_single_matches_new() {
        assert_eq!(
            IndexSpec::single("a_1", "a"),
            IndexSpec::new("a_1", vec!["a".into()]).expect("valid")
        );
    }
}
