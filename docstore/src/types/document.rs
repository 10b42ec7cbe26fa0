//! Documents: ordered field name -> value mappings.
//!
//! # Encoding
//!
//! ```text
//! +---------+------------------------------------------------+
//! | 0-1     | field_count (u16)                              |
//! | 2-N     | per field: name_len (u16), name, value bytes   |
//! +---------+------------------------------------------------+
//! ```
//!
//! Field order is preserved across encode/decode.

use std::fmt;

use crate::types::value::{Value, ValueError};

/// Maximum encoded size of a single document (16 MiB).
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Largest field count the encoding can express.
pub const MAX_FIELDS: usize = u16::MAX as usize;

/// Longest field name, in bytes, the encoding can express.
pub const MAX_FIELD_NAME_LEN: usize = u16::MAX as usize;

/// An ordered mapping of field name to value.
///
/// # Invariants
///
/// - Field names are unique within a document.
/// - Fields keep the order in which they were first set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Create an empty document.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing the existing value in place if present.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_owned(), value));
        }
    }

    /// Get a field's value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Whether the document has a field with this name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Calculate the encoded size of this document.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        2 + self
            .fields
            .iter()
            .map(|(n, v)| 2 + n.len() + v.serialized_size())
            .sum::<usize>()
    }

    /// Check that the field count and every field name fit the encoding.
    ///
    /// # Errors
    ///
    /// Returns `TooManyFields` or `FieldNameTooLong`.
    pub fn check_encodable(&self) -> Result<(), DocumentError> {
        if self.fields.len() > MAX_FIELDS {
            return Err(DocumentError::TooManyFields(self.fields.len()));
        }
        if let Some((name, _)) = self.fields.iter().find(|(n, _)| n.len() > MAX_FIELD_NAME_LEN) {
            return Err(DocumentError::FieldNameTooLong(name.len()));
        }
        Ok(())
    }

    /// Serialize the document to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the document fails `check_encodable`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        self.check_encodable()?;
        let mut bytes = Vec::with_capacity(self.serialized_size());

        // Checked against MAX_FIELDS and MAX_FIELD_NAME_LEN above.
        #[allow(clippy::cast_possible_truncation)]
        let count = self.fields.len() as u16;
        bytes.extend_from_slice(&count.to_le_bytes());

        for (name, value) in &self.fields {
            #[allow(clippy::cast_possible_truncation)]
            let name_len = name.len() as u16;
            bytes.extend_from_slice(&name_len.to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            value.write_to(&mut bytes);
        }

        Ok(bytes)
    }

    /// Deserialize a document from exactly `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let count_bytes = bytes.get(0..2).ok_or(DocumentError::Truncated)?;
        let count = u16::from_le_bytes([count_bytes[0], count_bytes[1]]) as usize;

        let mut fields = Vec::with_capacity(count);
        let mut offset = 2;
        for _ in 0..count {
            let len_bytes = bytes
                .get(offset..offset + 2)
                .ok_or(DocumentError::Truncated)?;
            let name_len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
            offset += 2;

            let name = bytes
                .get(offset..offset + name_len)
                .ok_or(DocumentError::Truncated)?;
            let name = std::str::from_utf8(name).map_err(|_| DocumentError::InvalidFieldName)?;
            offset += name_len;

            let (value, consumed) = Value::from_bytes(&bytes[offset..])?;
            offset += consumed;

            if fields.iter().any(|(n, _): &(String, Value)| n == name) {
                return Err(DocumentError::DuplicateField(name.to_owned()));
            }
            fields.push((name.to_owned(), value));
        }

        if offset != bytes.len() {
            return Err(DocumentError::TrailingBytes(bytes.len() - offset));
        }

        Ok(Self { fields })
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{ ")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, " }}")
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut doc = Self::new();
        for (name, value) in iter {
            let name: String = name.into();
            doc.set(&name, value);
        }
        doc
    }
}

/// Errors that can occur while decoding a document.
#[derive(Debug, PartialEq, Eq)]
pub enum DocumentError {
    /// The buffer ended before the document was complete.
    Truncated,
    /// A field name is not valid UTF-8.
    InvalidFieldName,
    /// A field name appears twice.
    DuplicateField(String),
    /// Bytes remain after the last field.
    TrailingBytes(usize),
    /// A field value failed to decode.
    Value(ValueError),
    /// More fields than the encoding can count.
    TooManyFields(usize),
    /// A field name longer than the encoding allows.
    FieldNameTooLong(usize),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "document truncated"),
            Self::InvalidFieldName => write!(f, "field name is not valid UTF-8"),
            Self::DuplicateField(name) => write!(f, "duplicate field: {name}"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after document"),
            Self::Value(e) => write!(f, "value error: {e}"),
            Self::TooManyFields(n) => write!(f, "{n} fields exceeds maximum of {MAX_FIELDS}"),
            Self::FieldNameTooLong(len) => write!(
                f,
                "field name of {len} bytes exceeds maximum of {MAX_FIELD_NAME_LEN} bytes"
            ),
        }
    }
}

impl std::error::Error for DocumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Value(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValueError> for DocumentError {
    fn from(e: ValueError) -> Self {
        Self::Value(e)
    }
}
