//! Index keys and their ordering.
//!
//! An `IndexKey` is the tuple of values a document holds for an index's
//! fields. Keys compare with a total order:
//!
//! - Types rank Null < numbers < strings < booleans
//! - Ints and doubles compare by numeric value (`Int(1) == Double(1.0)`)
//! - NaN sorts below every other number and equals itself
//! - Strings compare bytewise
//!
//! A field a document does not have indexes as `Null`.

use std::cmp::Ordering;
use std::fmt;

use crate::index::IndexSpec;
use crate::types::{Document, Value};

/// Largest encoded key accepted by a unique index, in bytes.
pub const MAX_KEY_SIZE: usize = 1024;

/// 2^63 as a double: the first double above every i64.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Values of an index's fields, in the index's field order.
#[derive(Debug, Clone)]
pub struct IndexKey(Vec<Value>);

impl IndexKey {
    /// Create a key from values.
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Extract the key for `spec` from `doc`. Missing fields become `Null`.
    #[must_use]
    pub fn extract(spec: &IndexSpec, doc: &Document) -> Self {
        Self(
            spec.fields()
                .iter()
                .map(|field| doc.get(field).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// The key's values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Size of the key in its encoded form.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.0.iter().map(Value::serialized_size).sum()
    }

    /// Render the key with the index's field names, e.g. `{ a: 1, b: "x" }`.
    #[must_use]
    pub const fn display<'a>(&'a self, spec: &'a IndexSpec) -> KeyDisplay<'a> {
        KeyDisplay { key: self, spec }
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match compare_values(a, b) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// `IndexKey` shown with field names.
pub struct KeyDisplay<'a> {
    key: &'a IndexKey,
    spec: &'a IndexSpec,
}

impl fmt::Display for KeyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (i, (field, value)) in self.spec.fields().iter().zip(self.key.values()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {value}")?;
        }
        write!(f, " }}")
    }
}

/// Rank of a value's type in the cross-type order.
const fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) | Value::Double(_) => 1,
        Value::String(_) => 2,
        Value::Boolean(_) => 3,
    }
}

/// Total order over values used by index keys.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Double(x), Value::Double(y)) => compare_doubles(*x, *y),
        (Value::Int(i), Value::Double(d)) => compare_int_double(*i, *d),
        (Value::Double(d), Value::Int(i)) => compare_int_double(*i, *d).reverse(),
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_doubles(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        // Neither is NaN, so the comparison is defined (and -0.0 == 0.0).
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer with a double, without rounding `i`.
fn compare_int_double(i: i64, d: f64) -> Ordering {
    if d.is_nan() {
        return Ordering::Greater;
    }
    if d >= TWO_POW_63 {
        return Ordering::Less;
    }
    if d < -TWO_POW_63 {
        return Ordering::Greater;
    }

    let whole = d.trunc();
    // In range: -2^63 <= whole < 2^63.
    #[allow(clippy::cast_possible_truncation)]
    let whole_int = whole as i64;
    match i.cmp(&whole_int) {
        Ordering::Equal => {
            let fraction = d - whole;
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        ordering => ordering,
    }
}
