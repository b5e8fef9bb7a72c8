//! Error types for the datalayer-store crate

use datalayer_crypto::Bytes32;
use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by storage backends
#[derive(Error, Debug)]
pub enum StoreError {
    /// Tree id registered twice
    #[error("tree already exists: {0}")]
    TreeAlreadyExists(Bytes32),

    /// Root row written for an unregistered tree
    #[error("tree not found: {0}")]
    TreeNotFound(Bytes32),

    /// A root row for this generation already exists
    #[error("root already exists for tree {tree_id} at generation {generation}")]
    RootConflict { tree_id: Bytes32, generation: u32 },

    /// Stored data violates a structural invariant
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Database driver error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid backend configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<datalayer_crypto::CryptoError> for StoreError {
    fn from(err: datalayer_crypto::CryptoError) -> Self {
        StoreError::Integrity(err.to_string())
    }
}
