//! Record store: documents in variable-size slots, addressed by `RecordId`.
//!
//! The store owns the indirection table from logical ids to physical slot
//! locations. Callers only ever see ids; a relocating update moves a document
//! to a new slot and the id keeps pointing at it.
//!
//! # Write ordering
//!
//! A relocating update is:
//!
//! 1. allocate the new slot (and write a free header after it if it splits
//!    a free run)
//! 2. write the new slot with the next version; this is the commit point
//! 3. point the id at the new slot
//! 4. sync, then overwrite the old slot with a free header
//!
//! A failure before step 2 completes leaves the store unchanged. A crash after
//! step 2 but before step 4 leaves two slots for the id on disk; recovery keeps
//! the higher version.
//!
//! An in-place update never overwrites the only copy of a document:
//!
//! 1. copy the current version into a fresh shadow slot, then sync
//! 2. overwrite the slot in place with the next version; this is the commit
//!    point
//! 3. sync, then overwrite the shadow with a free header
//!
//! A torn write in step 2 leaves the shadow as the newest valid version, both
//! on disk and in the indirection table. Free headers are only written after a
//! sync, so they cannot reach the disk ahead of the slot that supersedes them.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::index::IndexSpec;
use crate::storage::allocator::{AllocationPolicy, UnitAllocator, grow_padding, shrink_padding};
use crate::storage::io::{Storage, StorageError};
use crate::storage::recovery::{self, RecoveryResult};
use crate::storage::slot::{SlotHeader, SlotState, UNIT_SIZE_U64, capacity, encode_slot, units_for};
use crate::storage::superblock::{SUPERBLOCK_REGION, Superblock, SuperblockError};
use crate::types::{Document, DocumentError, MAX_DOCUMENT_SIZE, RecordId, SlotLocation};

/// Byte offset where the data region starts.
pub const DATA_START: u64 = SUPERBLOCK_REGION as u64;

/// Smallest step by which the data region grows (32 KiB).
const MIN_GROWTH_UNITS: u64 = 1024;

/// Byte offset of an allocation unit.
#[must_use]
pub const fn unit_offset(unit: u64) -> u64 {
    DATA_START + unit * UNIT_SIZE_U64
}

/// In-memory indirection entry for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    /// Where the newest version lives.
    pub location: SlotLocation,
    /// Version written in the slot header.
    pub version: u64,
    /// Length of the document bytes.
    pub len: u32,
}

/// Result of a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Whether the document moved to a new slot.
    pub relocated: bool,
    /// Location after the update.
    pub location: SlotLocation,
}

/// Statistics about a record store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStoreStats {
    /// Number of live records.
    pub num_records: usize,
    /// Sum of the document sizes in bytes.
    pub data_size: u64,
    /// Size of the underlying storage in bytes.
    pub storage_size: u64,
    /// Free allocation units in the data region.
    pub free_units: u64,
    /// Current padding factor.
    pub padding_factor: f64,
    /// Updates that moved a document since open.
    pub relocations: u64,
    /// Updates that fit the existing slot since open.
    pub in_place_updates: u64,
}

/// A store of documents in slots over a `Storage` backend.
///
/// # Invariants
///
/// - Every entry of `slots` points at a live slot holding that id's newest
///   version, and its units are marked used in `allocator`.
/// - `next_id` is greater than every id ever written to this data file.
/// - Units at or beyond `high_water` have never held a slot.
pub struct RecordStore<S: Storage> {
    storage: S,
    superblock: Superblock,
    allocator: UnitAllocator,
    slots: BTreeMap<RecordId, SlotEntry>,
    next_id: RecordId,
    high_water: u64,
    max_units: u64,
    max_data_bytes: u64,
    sync_on_write: bool,
    /// Slots that no longer hold a live version but whose free header could
    /// not be written yet. Their units stay allocated until it is.
    pending_release: Vec<(SlotLocation, RecordId)>,
    data_size: u64,
    relocations: u64,
    in_place_updates: u64,
}

impl<S: Storage> RecordStore<S> {
    /// Initialize an empty record store on `storage`.
    ///
    /// # Errors
    ///
    /// Returns `NotEmpty` if the storage already holds data, or a storage
    /// error if the superblock cannot be written.
    pub fn create(mut storage: S, config: &StoreConfig) -> Result<Self, RecordStoreError> {
        if storage.size() != 0 {
            return Err(RecordStoreError::NotEmpty(storage.size()));
        }

        let max_units = config.max_data_bytes / UNIT_SIZE_U64;
        let initial_units = MIN_GROWTH_UNITS.min(max_units);
        storage.grow(unit_offset(initial_units))?;

        let mut store = Self {
            storage,
            superblock: Superblock::new(config.allocation),
            allocator: UnitAllocator::new(initial_units),
            slots: BTreeMap::new(),
            next_id: RecordId::FIRST,
            high_water: 0,
            max_units,
            max_data_bytes: config.max_data_bytes,
            sync_on_write: config.sync_on_write,
            pending_release: Vec::new(),
            data_size: 0,
            relocations: 0,
            in_place_updates: 0,
        };
        store.write_superblock()?;
        store.storage.sync()?;

        info!(allocation = ?config.allocation, "Created record store");
        Ok(store)
    }

    /// Open an existing record store, rebuilding in-memory state from the
    /// slots on `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the superblock is missing or invalid, or if the
    /// storage cannot be read.
    pub fn open(mut storage: S, config: &StoreConfig) -> Result<(Self, RecoveryResult), RecordStoreError> {
        let size = storage.size();
        if size < DATA_START {
            let size = usize::try_from(size).unwrap_or(usize::MAX);
            return Err(StorageError::from(SuperblockError::Truncated(size)).into());
        }
        let mut buf = vec![0u8; SUPERBLOCK_REGION];
        storage.read_at(0, &mut buf)?;
        let superblock = Superblock::read_newest(&buf).map_err(StorageError::from)?;

        if superblock.allocation != config.allocation {
            debug!(
                file = ?superblock.allocation,
                configured = ?config.allocation,
                "Keeping allocation policy recorded in the data file"
            );
        }

        let state = recovery::scan(&mut storage)?;
        let next_id = superblock
            .next_id
            .max(state.max_record_id + 1)
            .max(RecordId::FIRST.as_u64());
        let data_size = state.slots.values().map(|e| u64::from(e.len)).sum();
        let total_units = state.allocator.total_units();

        let mut store = Self {
            storage,
            superblock,
            allocator: state.allocator,
            slots: state.slots,
            next_id: RecordId(next_id),
            high_water: state.high_water,
            max_units: (config.max_data_bytes / UNIT_SIZE_U64).max(total_units),
            max_data_bytes: config.max_data_bytes,
            sync_on_write: config.sync_on_write,
            pending_release: Vec::new(),
            data_size,
            relocations: 0,
            in_place_updates: 0,
        };

        for (location, former_id) in state.reclaim {
            let header = SlotHeader::free(location.units, former_id);
            store
                .storage
                .write_at(unit_offset(location.first_unit), &header.to_bytes())?;
        }
        store.storage.sync()?;

        let result = state.result;
        info!(
            records = result.records_recovered,
            stale_versions = result.stale_versions_discarded,
            torn_slots = result.torn_slots_discarded,
            next_id,
            "Opened record store"
        );
        if result.torn_slots_discarded > 0 {
            warn!(
                torn_slots = result.torn_slots_discarded,
                "Discarded torn slots during recovery"
            );
        }

        Ok((store, result))
    }

    /// The id the next insert will use.
    #[must_use]
    pub const fn next_id(&self) -> RecordId {
        self.next_id
    }

    /// Hand out the next record id without writing anything.
    ///
    /// An id that is reserved but never inserted is simply skipped.
    pub const fn reserve_id(&mut self) -> RecordId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    /// Insert a document under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is too large or storage fails.
    pub fn insert(&mut self, doc: &Document) -> Result<RecordId, RecordStoreError> {
        let id = self.reserve_id();
        self.insert_with_id(id, doc)?;
        Ok(id)
    }

    /// Insert a document under an id obtained from `reserve_id`.
    ///
    /// # Pre-conditions
    ///
    /// - `id` came from `reserve_id` and has not been inserted yet
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already live, the document is too large,
    /// or storage fails. On error nothing has been written.
    pub fn insert_with_id(&mut self, id: RecordId, doc: &Document) -> Result<SlotLocation, RecordStoreError> {
        if self.slots.contains_key(&id) {
            return Err(RecordStoreError::RecordExists(id));
        }
        if id >= self.next_id {
            self.next_id = id.next();
        }

        let body = encode(doc)?;
        let units = self.policy().slot_units(body.len(), self.superblock.padding_factor);
        let location = self.write_new_slot(id, 1, &body, units)?;
        let len = body_len(&body);

        self.slots.insert(
            id,
            SlotEntry {
                location,
                version: 1,
                len,
            },
        );
        self.data_size += u64::from(len);
        debug!(record_id = id.as_u64(), %location, len, "Inserted record");

        self.maybe_sync();
        Ok(location)
    }

    /// Replace the document stored under `id`.
    ///
    /// Overwrites the slot in place when the new document fits, otherwise
    /// moves it to a new slot. The id is unchanged either way.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` for an unknown id. On a storage error before
    /// the commit point the stored document is unchanged.
    pub fn update(&mut self, id: RecordId, doc: &Document) -> Result<UpdateOutcome, RecordStoreError> {
        let entry = *self.slots.get(&id).ok_or(RecordStoreError::RecordNotFound(id))?;
        let body = encode(doc)?;
        let len = body_len(&body);
        let version = entry.version + 1;

        if body.len() <= capacity(entry.location.units) {
            return self.update_in_place(id, entry, &body);
        }

        let units = self.policy().slot_units(body.len(), self.superblock.padding_factor);
        let location = self.write_new_slot(id, version, &body, units)?;

        self.slots.insert(
            id,
            SlotEntry {
                location,
                version,
                len,
            },
        );
        self.data_size = self.data_size - u64::from(entry.len) + u64::from(len);
        self.relocations += 1;
        if self.policy() == AllocationPolicy::PaddingFactor {
            self.superblock.padding_factor = grow_padding(self.superblock.padding_factor);
        }
        debug!(
            record_id = id.as_u64(),
            from = %entry.location,
            to = %location,
            len,
            "Relocated record"
        );

        self.release_slot(entry.location, id);
        self.maybe_sync();
        Ok(UpdateOutcome {
            relocated: true,
            location,
        })
    }

    /// Overwrite the slot of `entry` with `body`, keeping a shadow copy of the
    /// current version until the new one is on disk.
    fn update_in_place(
        &mut self,
        id: RecordId,
        entry: SlotEntry,
        body: &[u8],
    ) -> Result<UpdateOutcome, RecordStoreError> {
        let current = self.read_body(id, entry)?;
        let shadow = self.write_new_slot(id, entry.version, &current, units_for(current.len()))?;
        if let Err(e) = self.storage.sync() {
            self.release_slot(shadow, id);
            return Err(e.into());
        }

        let version = entry.version + 1;
        let header = SlotHeader::live(id, version, entry.location.units, body);
        let slot = encode_slot(header, body);
        let written = self
            .storage
            .write_at(unit_offset(entry.location.first_unit), &slot);
        let landed = match &written {
            Ok(()) => true,
            Err(_) => self.slot_landed(entry.location, &slot[..SlotHeader::SIZE + body.len()]),
        };
        if let (Err(e), false) = (written, landed) {
            // The slot may hold a torn mix of both versions; serve the shadow.
            warn!(
                record_id = id.as_u64(),
                location = %entry.location,
                %shadow,
                error = %e,
                "In-place update failed, keeping shadow copy"
            );
            self.slots.insert(
                id,
                SlotEntry {
                    location: shadow,
                    ..entry
                },
            );
            self.release_slot(entry.location, id);
            return Err(e.into());
        }

        let len = body_len(body);
        self.slots.insert(id, SlotEntry { version, len, ..entry });
        self.data_size = self.data_size - u64::from(entry.len) + u64::from(len);
        self.in_place_updates += 1;
        if self.policy() == AllocationPolicy::PaddingFactor {
            self.superblock.padding_factor = shrink_padding(self.superblock.padding_factor);
        }
        debug!(record_id = id.as_u64(), location = %entry.location, len, "Updated record in place");

        self.release_slot(shadow, id);
        self.maybe_sync();
        Ok(UpdateOutcome {
            relocated: false,
            location: entry.location,
        })
    }

    /// Read the document stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` for an unknown id, or `Corruption`/`Decode`
    /// if the slot no longer verifies.
    pub fn fetch(&mut self, id: RecordId) -> Result<Document, RecordStoreError> {
        let entry = *self.slots.get(&id).ok_or(RecordStoreError::RecordNotFound(id))?;
        let body = self.read_body(id, entry)?;
        Document::from_bytes(&body).map_err(|source| RecordStoreError::Decode { id, source })
    }

    /// Read and verify the encoded document of `entry`.
    fn read_body(&mut self, id: RecordId, entry: SlotEntry) -> Result<Vec<u8>, RecordStoreError> {
        let mut buf = vec![0u8; SlotHeader::SIZE + entry.len as usize];
        self.storage.read_at(unit_offset(entry.location.first_unit), &mut buf)?;

        let mut raw = [0u8; SlotHeader::SIZE];
        raw.copy_from_slice(&buf[..SlotHeader::SIZE]);
        let body = &buf[SlotHeader::SIZE..];
        let header = SlotHeader::from_bytes(raw)
            .and_then(|h| h.verify(body).map(|()| h))
            .map_err(|e| RecordStoreError::Corruption(format!("{id} at {}: {e}", entry.location)))?;
        if header.record_id() != id || header.version != entry.version {
            return Err(RecordStoreError::Corruption(format!(
                "{id} at {}: slot holds {} version {}",
                entry.location,
                header.record_id(),
                header.version
            )));
        }

        Ok(buf.split_off(SlotHeader::SIZE))
    }

    /// Remove the document stored under `id` and free its slot.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` for an unknown id, or a storage error when the
    /// slot still holds the record afterwards (in which case it is still
    /// present). A failed write that already destroyed the slot header
    /// completes the delete instead.
    pub fn delete(&mut self, id: RecordId) -> Result<(), RecordStoreError> {
        let entry = *self.slots.get(&id).ok_or(RecordStoreError::RecordNotFound(id))?;
        // An older version of this id still on disk would come back after a
        // restart once the newest slot is freed.
        self.retry_pending_releases()?;

        let header = SlotHeader::free(entry.location.units, id.as_u64());
        let freed = match self
            .storage
            .write_at(unit_offset(entry.location.first_unit), &header.to_bytes())
        {
            Ok(()) => true,
            Err(e) => {
                if self.slot_still_live(id, entry) {
                    return Err(e.into());
                }
                warn!(
                    record_id = id.as_u64(),
                    location = %entry.location,
                    error = %e,
                    "Delete write failed after the slot header was lost"
                );
                self.pending_release.push((entry.location, id));
                false
            }
        };

        self.slots.remove(&id);
        if freed {
            self.allocator
                .free(entry.location.first_unit, u64::from(entry.location.units));
        }
        self.data_size -= u64::from(entry.len);
        debug!(record_id = id.as_u64(), location = %entry.location, "Deleted record");

        self.maybe_sync();
        Ok(())
    }

    /// Whether `expected` reads back from the start of `location` after a
    /// write to it reported an error. A read failure counts as not landed.
    fn slot_landed(&mut self, location: SlotLocation, expected: &[u8]) -> bool {
        let mut buf = vec![0u8; expected.len()];
        self.storage
            .read_at(unit_offset(location.first_unit), &mut buf)
            .is_ok_and(|()| buf == expected)
    }

    /// Whether the header at `entry` still describes the live version of `id`.
    /// A read failure counts as live, leaving the record in place.
    fn slot_still_live(&mut self, id: RecordId, entry: SlotEntry) -> bool {
        let mut raw = [0u8; SlotHeader::SIZE];
        if self
            .storage
            .read_at(unit_offset(entry.location.first_unit), &mut raw)
            .is_err()
        {
            return true;
        }
        SlotHeader::from_bytes(raw).is_ok_and(|h| {
            h.state == SlotState::Live
                && h.verify_header().is_ok()
                && h.record_id() == id
                && h.version == entry.version
        })
    }

    /// Current location of `id`, if it is live.
    #[must_use]
    pub fn location(&self, id: RecordId) -> Option<SlotLocation> {
        self.slots.get(&id).map(|e| e.location)
    }

    /// Whether `id` is live.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.slots.keys().copied()
    }

    /// Every live document, in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns the first fetch error.
    pub fn scan(&mut self) -> Result<Vec<(RecordId, Document)>, RecordStoreError> {
        let ids: Vec<RecordId> = self.ids().collect();
        ids.into_iter()
            .map(|id| self.fetch(id).map(|doc| (id, doc)))
            .collect()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RecordStoreStats {
        RecordStoreStats {
            num_records: self.slots.len(),
            data_size: self.data_size,
            storage_size: self.storage.size(),
            free_units: self.allocator.free_count(),
            padding_factor: self.superblock.padding_factor,
            relocations: self.relocations,
            in_place_updates: self.in_place_updates,
        }
    }

    /// Slot sizing policy recorded in the data file.
    #[must_use]
    pub const fn policy(&self) -> AllocationPolicy {
        self.superblock.allocation
    }

    /// Unique index definitions recorded in the data file.
    #[must_use]
    pub fn index_catalog(&self) -> &[IndexSpec] {
        &self.superblock.indexes
    }

    /// Replace the index catalog and persist it immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog does not fit or cannot be written; the
    /// previous catalog is kept in that case.
    pub fn set_index_catalog(&mut self, indexes: Vec<IndexSpec>) -> Result<(), RecordStoreError> {
        let previous = std::mem::replace(&mut self.superblock.indexes, indexes);
        let written = self
            .write_superblock()
            .and_then(|()| self.storage.sync().map_err(RecordStoreError::from));
        if let Err(e) = written {
            self.superblock.indexes = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Persist the superblock and sync the storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a write or the sync fails.
    pub fn sync(&mut self) -> Result<(), RecordStoreError> {
        self.retry_pending_releases()?;
        self.write_superblock()?;
        self.storage.sync()?;
        Ok(())
    }

    /// The underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the underlying storage (fault injection in tests).
    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Sync after a write that already took effect. A failure does not undo
    /// the write, so it is logged and left to the next `sync`.
    fn maybe_sync(&mut self) {
        if !self.sync_on_write {
            return;
        }
        if let Err(e) = self.sync() {
            warn!(error = %e, "Sync after write failed");
        }
    }

    /// Write the superblock to the copy after the newest one. The sequence
    /// only advances on success, so a failed write is retried on the same
    /// copy and the other one stays intact.
    fn write_superblock(&mut self) -> Result<(), RecordStoreError> {
        self.superblock.next_id = self.next_id.as_u64();
        let current = self.superblock.sequence;
        self.superblock.sequence = current + 1;
        let written = self
            .superblock
            .to_bytes()
            .map_err(StorageError::from)
            .and_then(|bytes| {
                self.storage
                    .write_at(Superblock::copy_offset(current + 1), &bytes)
            });
        if let Err(e) = written {
            self.superblock.sequence = current;
            return Err(e.into());
        }
        Ok(())
    }

    /// Allocate `units` units and write a slot there. Nothing changes on error.
    fn write_new_slot(
        &mut self,
        id: RecordId,
        version: u64,
        body: &[u8],
        units: u64,
    ) -> Result<SlotLocation, RecordStoreError> {
        let units32 = u32::try_from(units).map_err(|_| RecordStoreError::DocumentTooLarge {
            size: body.len(),
            max: MAX_DOCUMENT_SIZE,
        })?;
        let first = self.allocate(units)?;
        let location = SlotLocation::new(first, units32);

        if let Err(e) = self.write_split_header(location) {
            self.allocator.free(first, units);
            return Err(e);
        }

        let header = SlotHeader::live(id, version, units32, body);
        let slot = encode_slot(header, body);
        if let Err(e) = self.storage.write_at(unit_offset(first), &slot) {
            // A landed slot would come back at recovery, so it must stay in use.
            if !self.slot_landed(location, &slot[..SlotHeader::SIZE + body.len()]) {
                self.allocator.free(first, units);
                return Err(e.into());
            }
            warn!(record_id = id.as_u64(), %location, error = %e, "Slot write failed but landed");
        }

        self.high_water = self.high_water.max(location.end_unit());
        Ok(location)
    }

    /// Keep the rest of a split free run reachable by the recovery scan.
    fn write_split_header(&mut self, location: SlotLocation) -> Result<(), RecordStoreError> {
        let end = location.end_unit();
        if end >= self.high_water || self.allocator.is_allocated(end) {
            return Ok(());
        }
        let run = self.allocator.free_run_len(end).min(self.high_water - end);
        let run = u32::try_from(run).unwrap_or(u32::MAX);
        let header = SlotHeader::free(run, 0);
        self.storage.write_at(unit_offset(end), &header.to_bytes())?;
        Ok(())
    }

    fn allocate(&mut self, units: u64) -> Result<u64, RecordStoreError> {
        if let Some(first) = self.allocator.allocate_contiguous(units) {
            return Ok(first);
        }

        let total = self.allocator.total_units();
        let required = total + units - self.allocator.trailing_free().min(units);
        if required > self.max_units {
            return Err(StorageError::Exhausted {
                requested_units: units,
                limit_bytes: self.max_data_bytes,
            }
            .into());
        }

        let new_total = required.max(total * 2).max(MIN_GROWTH_UNITS).min(self.max_units);
        self.storage.grow(unit_offset(new_total))?;
        self.allocator.expand(new_total);
        debug!(from_units = total, to_units = new_total, "Grew data region");

        self.allocator.allocate_contiguous(units).ok_or_else(|| {
            RecordStoreError::Corruption(format!("no run of {units} units after growing to {new_total}"))
        })
    }

    /// Free a slot that no longer holds the live version of `former_id`. The
    /// caller's write already took effect, so a failure here is only logged
    /// and retried later.
    fn release_slot(&mut self, location: SlotLocation, former_id: RecordId) {
        let header = SlotHeader::free(location.units, former_id.as_u64());
        let freed = self.storage.sync().and_then(|()| {
            self.storage
                .write_at(unit_offset(location.first_unit), &header.to_bytes())
        });
        match freed {
            Ok(()) => self
                .allocator
                .free(location.first_unit, u64::from(location.units)),
            Err(e) => {
                warn!(
                    record_id = former_id.as_u64(),
                    %location,
                    error = %e,
                    "Failed to free superseded slot"
                );
                self.pending_release.push((location, former_id));
            }
        }
    }

    fn retry_pending_releases(&mut self) -> Result<(), RecordStoreError> {
        if self.pending_release.is_empty() {
            return Ok(());
        }
        self.storage.sync()?;
        while let Some(&(location, former_id)) = self.pending_release.last() {
            let header = SlotHeader::free(location.units, former_id.as_u64());
            self.storage
                .write_at(unit_offset(location.first_unit), &header.to_bytes())?;
            self.allocator
                .free(location.first_unit, u64::from(location.units));
            self.pending_release.pop();
        }
        Ok(())
    }
}

fn encode(doc: &Document) -> Result<Vec<u8>, RecordStoreError> {
    let size = doc.serialized_size();
    if size > MAX_DOCUMENT_SIZE {
        return Err(RecordStoreError::DocumentTooLarge {
            size,
            max: MAX_DOCUMENT_SIZE,
        });
    }
    doc.to_bytes().map_err(RecordStoreError::Unencodable)
}

// Bodies are bounded by MAX_DOCUMENT_SIZE.
#[allow(clippy::cast_possible_truncation)]
const fn body_len(body: &[u8]) -> u32 {
    body.len() as u32
}

/// Errors that can occur during record store operations.
#[derive(Debug)]
pub enum RecordStoreError {
    /// Storage error.
    Storage(StorageError),
    /// No live record with this id.
    RecordNotFound(RecordId),
    /// The id is already live.
    RecordExists(RecordId),
    /// Serialized document exceeds the maximum size.
    DocumentTooLarge { size: usize, max: usize },
    /// The document cannot be expressed in the slot encoding.
    Unencodable(DocumentError),
    /// A slot verified but its document did not decode.
    Decode { id: RecordId, source: DocumentError },
    /// A slot no longer matches the indirection table.
    Corruption(String),
    /// `create` was called on storage that already holds data.
    NotEmpty(u64),
}

impl std::fmt::Display for RecordStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::RecordExists(id) => write!(f, "record already exists: {id}"),
            Self::DocumentTooLarge { size, max } => {
                write!(f, "document of {size} bytes exceeds maximum of {max} bytes")
            }
            Self::Unencodable(e) => write!(f, "cannot encode document: {e}"),
            Self::Decode { id, source } => write!(f, "cannot decode {id}: {source}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::NotEmpty(size) => write!(f, "storage already holds {size} bytes"),
        }
    }
}

impl std::error::Error for RecordStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Unencodable(e) | Self::Decode { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for RecordStoreError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
