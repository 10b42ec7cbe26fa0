//! Startup scan of the data region.
//!
//! There is no log to replay: every record slot carries its own id, version
//! and checksum, so the in-memory state (id -> location table, unit bitmap,
//! next id) is rebuilt by walking the slots in unit order.
//!
//! # Recovery Process
//!
//! 1. Start at unit 0 and read the slot header there
//! 2. Free header: hop over the free run
//! 3. Live header: read and verify the document bytes
//!    - keep the highest version seen for each record id
//!    - an older version is stale (a relocation or in-place update crashed
//!      before freeing it)
//!    - two slots with the same version are identical (an in-place update's
//!      shadow copy); the second one found is dropped
//! 4. Torn slot (checksum fails): discard it, counting it
//! 5. Empty header: end of the written region
//!
//! Stale and torn slots are returned so the caller can overwrite them with
//! free headers before the units are reused.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::{debug, warn};

use crate::storage::allocator::UnitAllocator;
use crate::storage::io::{Storage, StorageError};
use crate::storage::record_store::{SlotEntry, unit_offset};
use crate::storage::slot::{SlotHeader, SlotState, UNIT_SIZE_U64, capacity};
use crate::storage::superblock::SUPERBLOCK_REGION;
use crate::types::{RecordId, SlotLocation};

/// Result of a recovery scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of slot headers read.
    pub slots_scanned: usize,

    /// Number of records whose newest version was recovered.
    pub records_recovered: usize,

    /// Number of older versions superseded by a newer slot for the same id.
    pub stale_versions_discarded: usize,

    /// Number of slots discarded because their checksum failed.
    pub torn_slots_discarded: usize,
}

/// In-memory state rebuilt by `scan`.
#[derive(Debug)]
pub struct RecoveredState {
    /// Unit bitmap with every live slot marked used.
    pub allocator: UnitAllocator,
    /// Newest valid slot of every record.
    pub slots: BTreeMap<RecordId, SlotEntry>,
    /// End of the written part of the data region, in units.
    pub high_water: u64,
    /// Largest record id found in any header (live or free).
    pub max_record_id: u64,
    /// Slots to overwrite with free headers: (location, former record id).
    pub reclaim: Vec<(SlotLocation, u64)>,
    /// Scan statistics.
    pub result: RecoveryResult,
}

/// Number of allocation units in the data region of `storage`.
#[must_use]
pub fn data_units<S: Storage>(storage: &S) -> u64 {
    storage.size().saturating_sub(SUPERBLOCK_REGION as u64) / UNIT_SIZE_U64
}

/// Walk every slot in the data region and rebuild the in-memory state.
///
/// # Errors
///
/// Returns an error only if the storage itself cannot be read. Corrupt slots
/// are discarded and counted instead.
pub fn scan<S: Storage>(storage: &mut S) -> Result<RecoveredState, StorageError> {
    let total_units = data_units(storage);
    let mut allocator = UnitAllocator::new(total_units);
    let mut slots: BTreeMap<RecordId, SlotEntry> = BTreeMap::new();
    let mut reclaim = Vec::new();
    let mut result = RecoveryResult::default();
    let mut high_water = 0;
    let mut max_record_id = 0;
    // Set after a header that could not be trusted; the scan then walks one
    // unit at a time until it finds a verified header again.
    let mut resyncing = false;

    let mut unit = 0;
    while unit < total_units {
        let mut raw = [0u8; SlotHeader::SIZE];
        storage.read_at(unit_offset(unit), &mut raw)?;

        let header = match SlotHeader::from_bytes(raw) {
            Ok(header) if header.state == SlotState::Empty => {
                if resyncing {
                    unit += 1;
                    continue;
                }
                break;
            }
            Ok(header) if header.verify_header().is_ok() => header,
            _ => {
                if !resyncing {
                    warn!(unit, "Unreadable slot header, scanning for the next slot");
                    result.torn_slots_discarded += 1;
                    resyncing = true;
                }
                unit += 1;
                continue;
            }
        };

        let units = u64::from(header.units);
        if units == 0 || units > total_units - unit {
            if !resyncing {
                warn!(unit, units, "Slot header with impossible length");
                result.torn_slots_discarded += 1;
                resyncing = true;
            }
            unit += 1;
            continue;
        }

        resyncing = false;
        result.slots_scanned += 1;
        max_record_id = max_record_id.max(header.record_id);
        let location = SlotLocation::new(unit, header.units);

        if header.state == SlotState::Live {
            match read_live_slot(storage, &header, location)? {
                Some(entry) => {
                    allocator.mark_allocated(unit, units);
                    keep_newest(
                        &mut slots,
                        &mut allocator,
                        &mut reclaim,
                        &mut result,
                        header.record_id(),
                        entry,
                    );
                }
                None => {
                    warn!(
                        record_id = header.record_id,
                        version = header.version,
                        %location,
                        "Discarding torn slot"
                    );
                    result.torn_slots_discarded += 1;
                    reclaim.push((location, header.record_id));
                }
            }
        }

        unit += units;
        high_water = unit;
    }

    result.records_recovered = slots.len();
    debug!(
        slots_scanned = result.slots_scanned,
        records = result.records_recovered,
        high_water,
        "Data region scanned"
    );

    Ok(RecoveredState {
        allocator,
        slots,
        high_water,
        max_record_id,
        reclaim,
        result,
    })
}

/// Read and verify the document bytes of a live slot.
///
/// Returns `None` when the slot is torn.
fn read_live_slot<S: Storage>(
    storage: &mut S,
    header: &SlotHeader,
    location: SlotLocation,
) -> Result<Option<SlotEntry>, StorageError> {
    let len = header.len as usize;
    if len > capacity(header.units) {
        return Ok(None);
    }

    let mut body = vec![0u8; len];
    storage.read_at(unit_offset(location.first_unit) + SlotHeader::SIZE as u64, &mut body)?;
    if header.verify(&body).is_err() {
        return Ok(None);
    }

    Ok(Some(SlotEntry {
        location,
        version: header.version,
        len: header.len,
    }))
}

/// Record `entry` for `id` unless a newer version is already known.
fn keep_newest(
    slots: &mut BTreeMap<RecordId, SlotEntry>,
    allocator: &mut UnitAllocator,
    reclaim: &mut Vec<(SlotLocation, u64)>,
    result: &mut RecoveryResult,
    id: RecordId,
    entry: SlotEntry,
) {
    match slots.entry(id) {
        Entry::Vacant(vacant) => {
            vacant.insert(entry);
        }
        Entry::Occupied(mut occupied) => {
            let stale = if entry.version > occupied.get().version {
                occupied.insert(entry)
            } else {
                entry
            };
            debug!(
                record_id = id.as_u64(),
                version = stale.version,
                location = %stale.location,
                "Discarding stale record version"
            );
            allocator.free(stale.location.first_unit, u64::from(stale.location.units));
            reclaim.push((stale.location, id.as_u64()));
            result.stale_versions_discarded += 1;
        }
    }
}
