//! Field values stored inside documents.
//!
//! Provides the `Value` enum and its `ValueType` discriminant, along with the
//! binary encoding used inside record slots.

use std::fmt;

/// Value type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Null = 0x01,
    Boolean = 0x02,
    Int = 0x03,
    Double = 0x04,
    String = 0x05,
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Null),
            0x02 => Ok(Self::Boolean),
            0x03 => Ok(Self::Int),
            0x04 => Ok(Self::Double),
            0x05 => Ok(Self::String),
            _ => Err(value),
        }
    }
}

/// A document field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Double(f64),
    String(String),
}

/// Errors that can occur while decoding a value.
#[derive(Debug, PartialEq, Eq)]
pub enum ValueError {
    /// The buffer ended before the value was complete.
    Truncated,
    /// Unknown type tag.
    UnknownType(u8),
    /// String payload is not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "value truncated"),
            Self::UnknownType(t) => write!(f, "unknown value type: 0x{t:02x}"),
            Self::InvalidUtf8 => write!(f, "string value is not valid UTF-8"),
        }
    }
}

impl std::error::Error for ValueError {}

impl Value {
    /// Get the value type discriminant.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Int(_) => ValueType::Int,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
        }
    }

    /// Whether this value is numeric (`Int` or `Double`).
    #[must_use]
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Double(_))
    }

    /// Calculate the serialized size of this value.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // String::len() is not const-stable
    pub fn serialized_size(&self) -> usize {
        match self {
            Self::Null => 1,
            Self::Boolean(_) => 1 + 1,
            Self::Int(_) | Self::Double(_) => 1 + 8,
            Self::String(s) => 1 + 4 + s.len(), // type + len (4 bytes) + data
        }
    }

    /// Append the encoded value to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.value_type() as u8);

        match self {
            Self::Null => {}
            Self::Boolean(b) => out.push(u8::from(*b)),
            Self::Int(n) => out.extend_from_slice(&n.to_le_bytes()),
            Self::Double(n) => out.extend_from_slice(&n.to_le_bytes()),
            Self::String(s) => {
                // Document size is capped well below u32::MAX.
                #[allow(clippy::cast_possible_truncation)]
                let len = s.len() as u32;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Serialize this value to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut bytes);
        bytes
    }

    /// Deserialize a value from bytes.
    ///
    /// Returns the value and number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), ValueError> {
        let Some(&tag) = bytes.first() else {
            return Err(ValueError::Truncated);
        };
        let value_type = ValueType::try_from(tag).map_err(ValueError::UnknownType)?;

        match value_type {
            ValueType::Null => Ok((Self::Null, 1)),
            ValueType::Boolean => {
                let b = bytes.get(1).ok_or(ValueError::Truncated)?;
                Ok((Self::Boolean(*b != 0), 2))
            }
            ValueType::Int => {
                let raw = read_array::<8>(bytes, 1)?;
                Ok((Self::Int(i64::from_le_bytes(raw)), 9))
            }
            ValueType::Double => {
                let raw = read_array::<8>(bytes, 1)?;
                Ok((Self::Double(f64::from_le_bytes(raw)), 9))
            }
            ValueType::String => {
                let len = u32::from_le_bytes(read_array::<4>(bytes, 1)?) as usize;
                let data = bytes.get(5..5 + len).ok_or(ValueError::Truncated)?;
                let s = std::str::from_utf8(data).map_err(|_| ValueError::InvalidUtf8)?;
                Ok((Self::String(s.to_owned()), 5 + len))
            }
        }
    }
}

/// Copy `N` bytes starting at `offset`, failing if the buffer is too short.
fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], ValueError> {
    let slice = bytes
        .get(offset..offset + N)
        .ok_or(ValueError::Truncated)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Double(n) => write!(f, "{n:?}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Double(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}
