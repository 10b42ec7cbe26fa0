use std::process::ExitCode;

use docstore::collection::Collection;
use docstore::config::StoreConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Open (or create) the configured data file, recover it, validate every
/// unique index and log what was found.
fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        data_path = %config.data_path.display(),
        allocation = ?config.allocation,
        max_data_bytes = config.max_data_bytes,
        "Loaded configuration"
    );

    // Create the directory holding the data file.
    if let Some(parent) = config.data_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!("Failed to create data directory: {e}");
            return ExitCode::FAILURE;
        }
    }

    let collection = match Collection::open_or_create(&config.data_path, &config) {
        Ok(collection) => collection,
        Err(e) => {
            tracing::error!("Failed to open collection: {e}");
            return ExitCode::FAILURE;
        }
    };

    let report = match collection.validate() {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Failed to validate collection: {e}");
            return ExitCode::FAILURE;
        }
    };

    match collection.stats() {
        Ok(stats) => {
            tracing::info!(
                records = stats.store.num_records,
                data_size = stats.store.data_size,
                storage_size = stats.store.storage_size,
                free_units = stats.store.free_units,
                padding_factor = stats.store.padding_factor,
                "Record store"
            );
            for index in &stats.indexes {
                tracing::info!(
                    index = %index.name,
                    fields = ?index.fields,
                    entries = index.entries,
                    "Unique index"
                );
            }
        }
        Err(e) => tracing::warn!("Failed to read statistics: {e}"),
    }

    if let Err(e) = collection.sync() {
        tracing::error!("Failed to sync collection: {e}");
        return ExitCode::FAILURE;
    }

    if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        for (index, problem) in report.problems() {
            tracing::error!(index, "{problem}");
        }
        ExitCode::FAILURE
    }
}
