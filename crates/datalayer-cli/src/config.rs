//! Command line configuration

use datalayer_client::{Config as ClientConfig, DEFAULT_MAX_FILE_SIZE};
use datalayer_core::{DataStoreConfig, GapPolicy};
use datalayer_store::SqliteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for the `datalayer` binary
///
/// Read from an optional TOML file, then `DATALAYER__*` environment variables
/// (`DATALAYER__DATABASE__PATH`, `DATALAYER__MIRROR__MAX_RETRIES`, ...).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerConfig {
    /// SQLite database settings
    pub database: SqliteConfig,
    /// Use in-memory storage (for testing, data will not persist)
    pub use_memory_store: bool,
    /// How long an operation waits for the store lock
    pub lock_timeout_ms: Option<u64>,
    /// Mirror download settings
    pub mirror: MirrorConfig,
}

/// Settings for fetching delta files
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_file_size: u64,
    pub download_folder: Option<PathBuf>,
    pub gap_policy: GapPolicy,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            database: SqliteConfig::file("datalayer.sqlite"),
            use_memory_store: false,
            lock_timeout_ms: None,
            mirror: MirrorConfig::default(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            download_folder: None,
            gap_policy: GapPolicy::Strict,
        }
    }
}

impl DataLayerConfig {
    /// Layer the config file (if any) and the environment over the defaults
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file.to_path_buf()).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("DATALAYER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Store settings
    pub fn datastore_config(&self) -> DataStoreConfig {
        DataStoreConfig {
            lock_timeout: self.lock_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Mirror client settings
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default()
            .with_timeout(Duration::from_secs(self.mirror.timeout_secs))
            .with_max_retries(self.mirror.max_retries)
            .with_max_file_size(self.mirror.max_file_size)
            .with_gap_policy(self.mirror.gap_policy);
        if let Some(folder) = &self.mirror.download_folder {
            config = config.with_download_folder(folder);
        }
        config
    }
}
