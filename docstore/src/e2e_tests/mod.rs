//! End-to-end tests through the `Collection` API.
//!
//! Each file covers one scenario, with deterministic inputs, from the
//! caller's view down to the bytes in storage.

#![cfg(test)]

mod test_concurrent_key_claims;
mod test_crash_recovery;
mod test_duplicate_on_relocating_update;
mod test_multiple_unique_indexes;
mod test_noop_key_update;
mod test_relocation_transparency;
mod test_reopen_rebuilds_indexes;
mod test_storage_fault_rollback;
