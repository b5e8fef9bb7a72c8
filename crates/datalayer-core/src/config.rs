//! Data store configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Data store configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataStoreConfig {
    /// How long to wait for the store lock, `None` waits forever
    pub lock_timeout: Option<Duration>,
}

impl DataStoreConfig {
    /// Set the lock timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}
