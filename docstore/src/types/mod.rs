//! Core data types shared by the storage, index and collection layers.

pub mod document;
pub mod ids;
pub mod value;

pub use document::{Document, DocumentError, MAX_DOCUMENT_SIZE, MAX_FIELD_NAME_LEN, MAX_FIELDS};
pub use ids::{RecordId, SlotLocation};
pub use value::{Value, ValueError, ValueType};
