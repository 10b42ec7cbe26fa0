//! Store configuration module.
//!
//! This module provides configuration loading for a docstore collection from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `DOCSTORE_DATA_PATH`: Data file used by the `docstore` binary (default: `./data/collection.db`)
//! - `DOCSTORE_ALLOCATION`: Slot sizing policy, `padding` or `power_of_2` (default: `padding`)
//! - `DOCSTORE_MAX_DATA_BYTES`: Upper bound for the data region (default: 1 GiB)
//! - `DOCSTORE_SYNC_ON_WRITE`: Sync storage after every write, `true` or `false` (default: `false`)
//!
//! # Invariants
//!
//! - `max_data_bytes` is at least one allocation unit
//! - `data_path` is always a valid path (may not exist yet)

use std::path::PathBuf;

use crate::storage::AllocationPolicy;

/// Collection and record store configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()` every field holds a validated value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Data file opened by the `docstore` binary.
    pub data_path: PathBuf,
    /// How new slots are sized. Only used when a data file is created; an
    /// existing file keeps the policy recorded in its superblock.
    pub allocation: AllocationPolicy,
    /// Largest size the data region may grow to.
    pub max_data_bytes: u64,
    /// Sync the storage after every mutating operation.
    pub sync_on_write: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(Self::DEFAULT_DATA_PATH),
            allocation: AllocationPolicy::default(),
            max_data_bytes: Self::DEFAULT_MAX_DATA_BYTES,
            sync_on_write: false,
        }
    }
}

impl StoreConfig {
    /// Default data file.
    pub const DEFAULT_DATA_PATH: &'static str = "./data/collection.db";
    /// Default upper bound for the data region (1 GiB).
    pub const DEFAULT_MAX_DATA_BYTES: u64 = 1024 * 1024 * 1024;

    /// Set the allocation policy.
    #[must_use]
    pub const fn with_allocation(mut self, allocation: AllocationPolicy) -> Self {
        self.allocation = allocation;
        self
    }

    /// Set the data region limit.
    #[must_use]
    pub const fn with_max_data_bytes(mut self, max_data_bytes: u64) -> Self {
        self.max_data_bytes = max_data_bytes;
        self
    }

    /// Enable or disable syncing after every write.
    #[must_use]
    pub const fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Set the data file path.
    #[must_use]
    pub fn with_data_path(mut self, data_path: impl Into<PathBuf>) -> Self {
        self.data_path = data_path.into();
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value (`None` when unset).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DOCSTORE_ALLOCATION` is not `padding` or `power_of_2`
    /// - `DOCSTORE_MAX_DATA_BYTES` is not a number of at least 32
    /// - `DOCSTORE_SYNC_ON_WRITE` is not `true` or `false`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_path = lookup("DOCSTORE_DATA_PATH")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_PATH), PathBuf::from);
        let allocation = Self::load_allocation(&lookup)?;
        let max_data_bytes = Self::load_max_data_bytes(&lookup)?;
        let sync_on_write = Self::load_sync_on_write(&lookup)?;

        Ok(Self {
            data_path,
            allocation,
            max_data_bytes,
            sync_on_write,
        })
    }

    fn load_allocation<F>(lookup: &F) -> Result<AllocationPolicy, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup("DOCSTORE_ALLOCATION").as_deref() {
            None | Some("padding") => Ok(AllocationPolicy::PaddingFactor),
            Some("power_of_2") => Ok(AllocationPolicy::PowerOf2Sizes),
            Some(other) => Err(ConfigError::InvalidValue {
                name: "DOCSTORE_ALLOCATION".to_string(),
                message: format!("'{other}' is not one of: padding, power_of_2"),
            }),
        }
    }

    fn load_max_data_bytes<F>(lookup: &F) -> Result<u64, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(value) = lookup("DOCSTORE_MAX_DATA_BYTES") else {
            return Ok(Self::DEFAULT_MAX_DATA_BYTES);
        };
        match value.parse::<u64>() {
            Ok(bytes) if bytes >= crate::storage::UNIT_SIZE_U64 => Ok(bytes),
            _ => Err(ConfigError::InvalidValue {
                name: "DOCSTORE_MAX_DATA_BYTES".to_string(),
                message: format!("'{value}' is not a byte count of at least 32"),
            }),
        }
    }

    fn load_sync_on_write<F>(lookup: &F) -> Result<bool, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup("DOCSTORE_SYNC_ON_WRITE").as_deref() {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(other) => Err(ConfigError::InvalidValue {
                name: "DOCSTORE_SYNC_ON_WRITE".to_string(),
                message: format!("'{other}' is not true or false"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = StoreConfig::from_lookup(lookup_from(&[])).expect("defaults");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.data_path, PathBuf::from("./data/collection.db"));
        assert_eq!(config.allocation, AllocationPolicy::PaddingFactor);
        assert_eq!(config.max_data_bytes, 1024 * 1024 * 1024);
        assert!(!config.sync_on_write);
    }

    #[test]
    fn test_all_values_set() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("DOCSTORE_DATA_PATH", "/tmp/x.db"),
            ("DOCSTORE_ALLOCATION", "power_of_2"),
            ("DOCSTORE_MAX_DATA_BYTES", "65536"),
            ("DOCSTORE_SYNC_ON_WRITE", "true"),
        ]))
        .expect("valid config");

        assert_eq!(config.data_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.allocation, AllocationPolicy::PowerOf2Sizes);
        assert_eq!(config.max_data_bytes, 65536);
        assert!(config.sync_on_write);
    }

    #[test]
    fn test_invalid_allocation() {
        let error = StoreConfig::from_lookup(lookup_from(&[("DOCSTORE_ALLOCATION", "exact")]))
            .expect_err("should reject");
        assert!(error.to_string().contains("DOCSTORE_ALLOCATION"));
    }

    #[test]
    fn test_invalid_max_data_bytes() {
        for bad in ["lots", "-1", "16"] {
            let result =
                StoreConfig::from_lookup(lookup_from(&[("DOCSTORE_MAX_DATA_BYTES", bad)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { ref name, .. }) if name == "DOCSTORE_MAX_DATA_BYTES"),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_sync_on_write() {
        let result = StoreConfig::from_lookup(lookup_from(&[("DOCSTORE_SYNC_ON_WRITE", "yes")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = StoreConfig::default()
            .with_allocation(AllocationPolicy::PowerOf2Sizes)
            .with_max_data_bytes(4096)
            .with_sync_on_write(true)
            .with_data_path("other.db");
        assert_eq!(config.allocation, AllocationPolicy::PowerOf2Sizes);
        assert_eq!(config.max_data_bytes, 4096);
        assert!(config.sync_on_write);
        assert_eq!(config.data_path, PathBuf::from("other.db"));
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
