//! Identifier types for records and their physical locations.
//!
//! A `RecordId` is the stable logical handle handed out to callers. A
//! `SlotLocation` is where the record currently lives in the data region and
//! may change on every relocating update. Only the record store maps one to
//! the other.

use std::fmt;

/// Logical identifier of a document.
///
/// # Invariants
///
/// - Assigned once at insert, never changes, never reused within a data file.
/// - `0` is never a valid id (it marks "no record" in slot headers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    /// The first id handed out by an empty store.
    pub const FIRST: Self = Self(1);

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Physical location of a record slot inside the data region.
///
/// Measured in allocation units relative to the start of the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotLocation {
    /// First allocation unit of the slot (holds the slot header).
    pub first_unit: u64,
    /// Number of contiguous units the slot spans.
    pub units: u32,
}

impl SlotLocation {
    /// Create a new location.
    #[must_use]
    pub const fn new(first_unit: u64, units: u32) -> Self {
        Self { first_unit, units }
    }

    /// One past the last unit of the slot.
    #[must_use]
    pub const fn end_unit(&self) -> u64 {
        self.first_unit + self.units as u64
    }
}

impl fmt::Display for SlotLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "units {}..{}", self.first_unit, self.end_unit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_next() {
        assert_eq!(RecordId::FIRST.next(), RecordId(2));
        assert_eq!(RecordId::from(7).as_u64(), 7);
    }

    #[test]
    fn test_record_id_ordering() {
        assert!(RecordId(1) < RecordId(2));
    }

    #[test]
    fn test_slot_location_end() {
        let loc = SlotLocation::new(10, 3);
        assert_eq!(loc.end_unit(), 13);
        assert_eq!(loc.to_string(), "units 10..13");
    }
}
