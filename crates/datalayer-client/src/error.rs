//! Client error types

use datalayer_core::{CoreError, ReplicationError};
use datalayer_crypto::Bytes32;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Applying downloaded data failed
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// Store error outside of replication
    #[error(transparent)]
    Core(#[from] CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The anchored root history cannot be followed
    #[error("Invalid root history: {0}")]
    InvalidHistory(String),

    /// Local root differs from the anchored root after syncing
    #[error("Root mismatch for tree {tree_id}: expected {expected:?}, got {actual:?}")]
    RootMismatch {
        tree_id: Bytes32,
        expected: Option<Bytes32>,
        actual: Option<Bytes32>,
    },

    /// Every mirror failed to serve the missing generations
    #[error("No reachable mirror for tree {tree_id} (tried {tried})")]
    NoReachableMirror { tree_id: Bytes32, tried: usize },
}

impl ClientError {
    /// Check if a mirror failed to serve a file
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Replication(ReplicationError::Transport { .. }))
    }
}
