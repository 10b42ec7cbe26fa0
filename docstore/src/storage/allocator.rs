//! Unit allocator using a bitmap to track free/used allocation units.
//!
//! Each bit represents one unit of the data region: 0 = free, 1 = used. The
//! bitmap lives in memory only; it is rebuilt from the slot headers by the
//! recovery scan when a data file is opened.

// Unit numbers are u64 but bitmap indices are usize. On 64-bit systems these are the same size.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::slot::{SlotHeader, UNIT_SIZE, units_for};

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// Padding factor bounds and adjustment steps.
pub const MIN_PADDING_FACTOR: f64 = 1.0;
pub const MAX_PADDING_FACTOR: f64 = 2.0;
const PADDING_GROWTH: f64 = 0.6;
const PADDING_SHRINK: f64 = 0.001;

/// How a new slot is sized for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AllocationPolicy {
    /// Document size times the collection's adaptive padding factor.
    #[default]
    PaddingFactor = 0x00,
    /// Header plus document rounded up to the next power of two.
    PowerOf2Sizes = 0x01,
}

impl TryFrom<u8> for AllocationPolicy {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::PaddingFactor),
            0x01 => Ok(Self::PowerOf2Sizes),
            _ => Err(value),
        }
    }
}

impl AllocationPolicy {
    /// Byte stored in the superblock.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Number of units to allocate for a document of `doc_len` bytes.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation
    )]
    pub fn slot_units(self, doc_len: usize, padding_factor: f64) -> u64 {
        match self {
            Self::PaddingFactor => {
                let factor = padding_factor.clamp(MIN_PADDING_FACTOR, MAX_PADDING_FACTOR);
                let padded = (doc_len as f64 * factor).ceil() as usize;
                units_for(padded.max(doc_len))
            }
            Self::PowerOf2Sizes => {
                let total = (SlotHeader::SIZE + doc_len).next_power_of_two().max(UNIT_SIZE);
                (total / UNIT_SIZE) as u64
            }
        }
    }
}

/// Padding factor after a document had to move.
#[must_use]
pub fn grow_padding(factor: f64) -> f64 {
    (factor + PADDING_GROWTH).min(MAX_PADDING_FACTOR)
}

/// Padding factor after a document was updated in place.
#[must_use]
pub fn shrink_padding(factor: f64) -> f64 {
    (factor - PADDING_SHRINK).max(MIN_PADDING_FACTOR)
}

/// An allocation bitmap over the units of the data region.
#[derive(Debug)]
pub struct UnitAllocator {
    /// The bitmap data.
    bitmap: Vec<u8>,
    /// Total number of units being tracked.
    total_units: u64,
    /// Number of free units.
    free_count: u64,
    /// No unit below this one is free.
    next_search_hint: u64,
}

impl UnitAllocator {
    /// Create an allocator with `total_units` free units.
    #[must_use]
    pub fn new(total_units: u64) -> Self {
        let bitmap_bytes = (total_units as usize).div_ceil(BITS_PER_BYTE);
        Self {
            bitmap: vec![0u8; bitmap_bytes],
            total_units,
            free_count: total_units,
            next_search_hint: 0,
        }
    }

    /// Allocate `count` contiguous units, first fit.
    ///
    /// Returns `None` if no contiguous run of the requested size is available.
    pub fn allocate_contiguous(&mut self, count: u64) -> Option<u64> {
        if count == 0 || count > self.free_count {
            return None;
        }

        // Every unit below the hint is used, so the search can start there.
        let mut run_start = self.next_search_hint;
        let mut run_length = 0u64;

        for unit in self.next_search_hint..self.total_units {
            if get_bit(&self.bitmap, unit as usize) {
                run_start = unit + 1;
                run_length = 0;
            } else {
                run_length += 1;
                if run_length >= count {
                    self.mark_allocated(run_start, count);
                    return Some(run_start);
                }
            }
        }

        None
    }

    /// Mark `count` units starting at `first` as used.
    ///
    /// Used by recovery to rebuild the bitmap from live slots.
    pub fn mark_allocated(&mut self, first: u64, count: u64) {
        for unit in first..(first + count).min(self.total_units) {
            if !get_bit(&self.bitmap, unit as usize) {
                set_bit(&mut self.bitmap, unit as usize);
                self.free_count -= 1;
            }
        }
        if self.next_search_hint >= first && self.next_search_hint < first + count {
            self.next_search_hint = first + count;
        }
    }

    /// Free `count` units starting at `first`.
    pub fn free(&mut self, first: u64, count: u64) {
        for unit in first..(first + count).min(self.total_units) {
            if get_bit(&self.bitmap, unit as usize) {
                clear_bit(&mut self.bitmap, unit as usize);
                self.free_count += 1;
            }
        }
        if first < self.next_search_hint {
            self.next_search_hint = first;
        }
    }

    /// Check if a unit is allocated.
    #[must_use]
    pub fn is_allocated(&self, unit: u64) -> bool {
        if unit >= self.total_units {
            return false;
        }
        get_bit(&self.bitmap, unit as usize)
    }

    /// Length of the free run starting at `unit` (0 if `unit` is used).
    #[must_use]
    pub fn free_run_len(&self, unit: u64) -> u64 {
        (unit..self.total_units)
            .take_while(|&u| !get_bit(&self.bitmap, u as usize))
            .count() as u64
    }

    /// Number of free units at the end of the tracked range.
    #[must_use]
    pub fn trailing_free(&self) -> u64 {
        (0..self.total_units)
            .rev()
            .take_while(|&u| !get_bit(&self.bitmap, u as usize))
            .count() as u64
    }

    /// Get the number of free units.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Get the total number of units being tracked.
    #[must_use]
    pub const fn total_units(&self) -> u64 {
        self.total_units
    }

    /// Expand the allocator to track more units.
    ///
    /// The new units are marked as free.
    pub fn expand(&mut self, new_total_units: u64) {
        if new_total_units <= self.total_units {
            return;
        }

        let new_bitmap_bytes = (new_total_units as usize).div_ceil(BITS_PER_BYTE);
        self.bitmap.resize(new_bitmap_bytes, 0);

        self.free_count += new_total_units - self.total_units;
        self.total_units = new_total_units;
    }
}

/// Get a bit from the bitmap.
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_index)) != 0
}

/// Set a bit in the bitmap (mark as used).
fn set_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] |= 1 << bit_index;
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] &= !(1 << bit_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_allocator_is_free() {
        let alloc = UnitAllocator::new(100);
        assert_eq!(alloc.free_count(), 100);
        assert!(!alloc.is_allocated(0));
        assert_eq!(alloc.free_run_len(0), 100);
    }

    #[test]
    fn test_allocate_and_free() {
        let mut alloc = UnitAllocator::new(100);

        let a = alloc.allocate_contiguous(3).expect("allocate a");
        let b = alloc.allocate_contiguous(2).expect("allocate b");
        let c = alloc.allocate_contiguous(4).expect("allocate c");
        assert_eq!((a, b, c), (0, 3, 5));
        assert_eq!(alloc.free_count(), 91);

        alloc.free(b, 2);
        assert!(!alloc.is_allocated(b));
        assert!(alloc.is_allocated(a + 2));
        assert!(alloc.is_allocated(c));
        assert_eq!(alloc.free_run_len(b), 2);

        // A 2-unit request reuses the hole, a 3-unit request does not fit there.
        assert_eq!(alloc.allocate_contiguous(3), Some(9));
        assert_eq!(alloc.allocate_contiguous(2), Some(b));
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut alloc = UnitAllocator::new(10);
        assert_eq!(alloc.allocate_contiguous(10), Some(0));
        assert_eq!(alloc.free_count(), 0);
        assert!(alloc.allocate_contiguous(1).is_none());
        assert!(alloc.allocate_contiguous(0).is_none());
    }

    #[test]
    fn test_fragmented_space_rejects_large_run() {
        let mut alloc = UnitAllocator::new(10);
        for _ in 0..5 {
            alloc.allocate_contiguous(2).expect("allocate");
        }
        alloc.free(0, 2);
        alloc.free(4, 2);
        assert_eq!(alloc.free_count(), 4);
        assert!(alloc.allocate_contiguous(3).is_none());
    }

    #[test]
    fn test_expand() {
        let mut alloc = UnitAllocator::new(8);
        alloc.allocate_contiguous(6).expect("allocate");

        alloc.expand(16);
        assert_eq!(alloc.total_units(), 16);
        assert_eq!(alloc.free_count(), 10);
        assert_eq!(alloc.trailing_free(), 10);

        // The tail of the old range joins the new units.
        assert_eq!(alloc.allocate_contiguous(10), Some(6));
    }

    #[test]
    fn test_mark_allocated_is_idempotent() {
        let mut alloc = UnitAllocator::new(16);
        alloc.mark_allocated(4, 4);
        alloc.mark_allocated(4, 4);
        assert_eq!(alloc.free_count(), 12);
        assert_eq!(alloc.allocate_contiguous(4), Some(0));
        assert_eq!(alloc.allocate_contiguous(1), Some(8));
        alloc.free(0, 4);
        assert_eq!(alloc.free_run_len(0), 4);
        assert_eq!(alloc.free_count(), 11);
    }

    #[test]
    fn test_padding_factor_policy() {
        let policy = AllocationPolicy::PaddingFactor;
        assert_eq!(policy.slot_units(32, 1.0), 2);
        assert_eq!(policy.slot_units(32, 2.0), 3);
        // Out-of-range factors are clamped.
        assert_eq!(policy.slot_units(32, 0.1), 2);
    }

    #[test]
    fn test_power_of_two_policy() {
        let policy = AllocationPolicy::PowerOf2Sizes;
        assert_eq!(policy.slot_units(0, 1.0), 1);
        assert_eq!(policy.slot_units(1, 1.0), 2);
        assert_eq!(policy.slot_units(33, 1.0), 4);
        assert_eq!(policy.slot_units(100, 1.0), 4);
        assert_eq!(policy.slot_units(97, 1.0), 8);
    }

    #[test]
    fn test_padding_adjustment_bounds() {
        let mut factor = MIN_PADDING_FACTOR;
        for _ in 0..5 {
            factor = grow_padding(factor);
        }
        assert!((factor - MAX_PADDING_FACTOR).abs() < f64::EPSILON);

        assert!((shrink_padding(MIN_PADDING_FACTOR) - MIN_PADDING_FACTOR).abs() < f64::EPSILON);
        assert!(shrink_padding(1.5) < 1.5);
    }

    #[test]
    fn test_policy_byte_conversion() {
        assert_eq!(
            AllocationPolicy::try_from(AllocationPolicy::PowerOf2Sizes.as_byte()),
            Ok(AllocationPolicy::PowerOf2Sizes)
        );
        assert_eq!(AllocationPolicy::try_from(9), Err(9));
    }
}
