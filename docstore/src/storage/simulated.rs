//! Simulated in-memory storage for deterministic testing.
//!
//! This module provides an in-memory implementation of the `Storage` trait
//! with support for fault injection at various levels:
//! - Write and sync errors at a configurable rate
//! - Torn writes (only a prefix of the bytes lands)
//! - Deterministic "fail after N writes" and "tear after N writes" triggers
//! - Crash images: a copy of the bytes that can be reopened later
//!
//! Every write that returns `Ok` is immediately part of the crash image; there
//! is no volatile write cache, so `sync` only counts calls and injects sync
//! errors.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{Storage, StorageError, check_bounds};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of a torn write (0.0 - 1.0).
    pub partial_write_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config that only fails writes, cleanly.
    #[must_use]
    pub const fn write_errors(rate: f64) -> Self {
        Self {
            read_error_rate: 0.0,
            write_error_rate: rate,
            sync_error_rate: 0.0,
            partial_write_rate: 0.0,
        }
    }
}

/// Statistics about simulated storage operations.
#[derive(Debug, Default, Clone)]
pub struct SimulatedStorageStats {
    /// Number of reads.
    pub reads: u64,
    /// Number of writes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of injected sync errors.
    pub injected_sync_errors: u64,
    /// Number of torn writes.
    pub partial_writes: u64,
}

/// In-memory storage implementation for deterministic testing.
///
/// Writes are immediately visible to reads. Given the same seed and the same
/// sequence of calls, the same faults are injected.
pub struct SimulatedStorage {
    bytes: Vec<u8>,
    fault_config: FaultConfig,
    /// Remaining writes before every write fails (`None` = disabled).
    writes_until_failure: Option<u64>,
    /// Whether the scheduled failing write lands half its bytes first.
    tear_scheduled: bool,
    rng: StdRng,
    stats: SimulatedStorageStats,
}

impl SimulatedStorage {
    /// Create an empty simulated storage with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create an empty simulated storage with custom fault configuration.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            bytes: Vec::new(),
            fault_config,
            writes_until_failure: None,
            tear_scheduled: false,
            rng: StdRng::seed_from_u64(seed),
            stats: SimulatedStorageStats::default(),
        }
    }

    /// Recreate storage from a crash image (see `crash_image`).
    #[must_use]
    pub fn from_image(image: Vec<u8>, seed: u64) -> Self {
        let mut storage = Self::new(seed);
        storage.bytes = image;
        storage
    }

    /// Copy of the current bytes, as they would be found after a crash.
    #[must_use]
    pub fn crash_image(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &SimulatedStorageStats {
        &self.stats
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Let the next `n` writes succeed, then fail every write.
    pub const fn fail_after_writes(&mut self, n: u64) {
        self.writes_until_failure = Some(n);
        self.tear_scheduled = false;
    }

    /// Like `fail_after_writes`, but the first failing write lands the first
    /// half of its bytes before it fails.
    pub const fn tear_after_writes(&mut self, n: u64) {
        self.writes_until_failure = Some(n);
        self.tear_scheduled = true;
    }

    /// Disable all injected faults.
    pub fn clear_faults(&mut self) {
        self.writes_until_failure = None;
        self.tear_scheduled = false;
        self.fault_config = FaultConfig::no_faults();
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn scheduled_write_failure(&mut self) -> bool {
        match self.writes_until_failure {
            Some(0) => true,
            Some(n) => {
                self.writes_until_failure = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

// Offsets index into a Vec<u8>; simulated storage never exceeds usize.
#[allow(clippy::cast_possible_truncation)]
impl Storage for SimulatedStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.stats.reads += 1;
        check_bounds(offset, buf.len(), self.size())?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }

        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        self.stats.writes += 1;
        check_bounds(offset, bytes.len(), self.size())?;

        let start = offset as usize;
        if self.scheduled_write_failure() {
            if std::mem::take(&mut self.tear_scheduled) {
                self.stats.partial_writes += 1;
                let cutoff = bytes.len() / 2;
                self.bytes[start..start + cutoff].copy_from_slice(&bytes[..cutoff]);
                return Err(StorageError::InjectedFault(
                    "simulated torn write".to_string(),
                ));
            }
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }
        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }

        if self.should_inject_fault(self.fault_config.partial_write_rate) {
            self.stats.partial_writes += 1;
            let cutoff = self.rng.random_range(0..bytes.len().max(1));
            self.bytes[start..start + cutoff].copy_from_slice(&bytes[..cutoff]);
            return Err(StorageError::InjectedFault(
                "simulated torn write".to_string(),
            ));
        }

        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.stats.syncs += 1;

        if self.should_inject_fault(self.fault_config.sync_error_rate) {
            self.stats.injected_sync_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }

        // Writes are already "durable" in memory.
        Ok(())
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn grow(&mut self, new_size: u64) -> Result<(), StorageError> {
        if new_size as usize > self.bytes.len() {
            self.bytes.resize(new_size as usize, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let mut storage = SimulatedStorage::new(1);
        storage.grow(64).expect("grow");
        storage.write_at(8, b"abc").expect("write");

        let mut buf = [0u8; 3];
        storage.read_at(8, &mut buf).expect("read");
        assert_eq!(&buf, b"abc");
        assert_eq!(storage.stats().writes, 1);
        assert_eq!(storage.stats().reads, 1);
    }

    #[test]
    fn test_fail_after_writes() {
        let mut storage = SimulatedStorage::new(1);
        storage.grow(64).expect("grow");
        storage.fail_after_writes(2);

        assert!(storage.write_at(0, b"a").is_ok());
        assert!(storage.write_at(1, b"b").is_ok());
        assert!(matches!(
            storage.write_at(2, b"c"),
            Err(StorageError::InjectedFault(_))
        ));
        assert!(storage.write_at(3, b"d").is_err());

        storage.clear_faults();
        assert!(storage.write_at(2, b"c").is_ok());
    }

    #[test]
    fn test_tear_after_writes() {
        let mut storage = SimulatedStorage::new(1);
        storage.grow(8).expect("grow");
        storage.tear_after_writes(1);

        storage.write_at(0, b"aaaa").expect("first write");
        assert!(storage.write_at(4, b"bbbb").is_err());
        assert_eq!(&storage.crash_image(), b"aaaabb\0\0");
        assert_eq!(storage.stats().partial_writes, 1);

        // Later writes fail cleanly.
        assert!(storage.write_at(0, b"cc").is_err());
        assert_eq!(&storage.crash_image()[..2], b"aa");
    }

    #[test]
    fn test_failed_write_leaves_bytes_untouched() {
        let mut storage = SimulatedStorage::with_config(7, FaultConfig::write_errors(1.0));
        storage.grow(16).expect("grow");
        assert!(storage.write_at(0, b"zzzz").is_err());

        let mut buf = [0xFFu8; 4];
        storage.read_at(0, &mut buf).expect("read");
        assert_eq!(buf, [0u8; 4]);
    }

    #[test]
    fn test_deterministic_faults() {
        let config = FaultConfig::write_errors(0.5);
        let outcomes = |seed| {
            let mut storage = SimulatedStorage::with_config(seed, config.clone());
            storage.grow(128).expect("grow");
            (0..64)
                .map(|i| storage.write_at(i, b"x").is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(outcomes(42), outcomes(42));
    }

    #[test]
    fn test_crash_image_reopen() {
        let mut storage = SimulatedStorage::new(1);
        storage.grow(8).expect("grow");
        storage.write_at(0, b"durable!").expect("write");

        let mut reopened = SimulatedStorage::from_image(storage.crash_image(), 2);
        let mut buf = [0u8; 8];
        reopened.read_at(0, &mut buf).expect("read");
        assert_eq!(&buf, b"durable!");
    }
}
