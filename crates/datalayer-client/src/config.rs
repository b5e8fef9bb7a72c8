//! Client configuration

use datalayer_core::{GapPolicy, ReplicationOptions};
use std::path::PathBuf;
use std::time::Duration;

/// Default cap on a downloaded delta file (1 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Maximum retry attempts per file
    pub max_retries: u32,
    /// Largest delta file accepted from a mirror, in bytes
    pub max_file_size: u64,
    /// Keep a copy of every downloaded delta file here
    pub download_folder: Option<PathBuf>,
    /// What to do when a mirror lacks a delta file
    pub gap_policy: GapPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("datalayer-client/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 3,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            download_folder: None,
            gap_policy: GapPolicy::Strict,
        }
    }
}

impl Config {
    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the largest delta file accepted from a mirror
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Cache downloads in a folder
    pub fn with_download_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.download_folder = Some(folder.into());
        self
    }

    /// Set the gap policy
    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }

    /// Options handed to the store when applying deltas
    pub fn replication_options(&self) -> ReplicationOptions {
        ReplicationOptions {
            gap_policy: self.gap_policy,
            cache_folder: self.download_folder.clone(),
        }
    }
}
