//! Error types for the datalayer-core crate

use datalayer_crypto::Bytes32;
use datalayer_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse classification of a [`CoreError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Integrity,
    Concurrency,
    Storage,
}

/// Errors that can occur in data store operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Tree id never created
    #[error("tree not found: {0}")]
    TreeNotFound(Bytes32),

    /// No node with this hash
    #[error("node not found: {0}")]
    NodeNotFound(Bytes32),

    /// Key absent from the tree
    #[error("key not found in tree {tree_id}: {key}")]
    KeyNotFound { tree_id: Bytes32, key: String },

    /// Node exists but is not reachable from the root in question
    #[error("node {node_hash} is not in tree {tree_id}")]
    NodeNotInTree { node_hash: Bytes32, tree_id: Bytes32 },

    /// Root hash is not in the tree's history
    #[error("root {root_hash} not found in history of tree {tree_id}")]
    RootNotFound { tree_id: Bytes32, root_hash: Bytes32 },

    /// No root row at this generation
    #[error("tree {tree_id} has no generation {generation}")]
    GenerationNotFound { tree_id: Bytes32, generation: u32 },

    /// Tree id created twice
    #[error("tree already exists: {0}")]
    TreeAlreadyExists(Bytes32),

    /// Key already present in the tree
    #[error("key already present in tree {tree_id}: {key}")]
    DuplicateKey { tree_id: Bytes32, key: String },

    /// Reference node or side missing, superfluous or not a terminal
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A batch left the root hash unchanged
    #[error("changelist resulted in no change to tree {0}")]
    EmptyEffectiveChange(Bytes32),

    /// Operation needs at least one key
    #[error("tree is empty: {0}")]
    EmptyTree(Bytes32),

    /// Node too large to fit in one replication record
    #[error("node of {size} bytes exceeds the record limit of {limit}")]
    NodeTooLarge { size: usize, limit: usize },

    /// Local generation differs from what the caller expected
    #[error("tree {tree_id} is at generation {actual}, expected {expected}")]
    GenerationMismatch {
        tree_id: Bytes32,
        expected: u32,
        actual: u32,
    },

    /// Stored data violates a structural invariant
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The store lock was not acquired in time
    #[error("timed out after {0:?} waiting for the store lock")]
    LockTimeout(Duration),

    /// Storage backend error
    #[error("storage error: {0}")]
    Store(#[source] StoreError),
}

impl CoreError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::TreeNotFound(_)
            | CoreError::NodeNotFound(_)
            | CoreError::KeyNotFound { .. }
            | CoreError::NodeNotInTree { .. }
            | CoreError::RootNotFound { .. }
            | CoreError::GenerationNotFound { .. } => ErrorKind::NotFound,
            CoreError::TreeAlreadyExists(_)
            | CoreError::DuplicateKey { .. }
            | CoreError::InvalidReference(_)
            | CoreError::EmptyEffectiveChange(_)
            | CoreError::EmptyTree(_)
            | CoreError::NodeTooLarge { .. }
            | CoreError::GenerationMismatch { .. } => ErrorKind::InvalidState,
            CoreError::Integrity(_) => ErrorKind::Integrity,
            CoreError::LockTimeout(_) => ErrorKind::Concurrency,
            CoreError::Store(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn key_not_found(tree_id: Bytes32, key: &[u8]) -> Self {
        CoreError::KeyNotFound {
            tree_id,
            key: hex::encode(key),
        }
    }

    pub(crate) fn duplicate_key(tree_id: Bytes32, key: &[u8]) -> Self {
        CoreError::DuplicateKey {
            tree_id,
            key: hex::encode(key),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TreeAlreadyExists(tree_id) => CoreError::TreeAlreadyExists(tree_id),
            StoreError::TreeNotFound(tree_id) => CoreError::TreeNotFound(tree_id),
            StoreError::Integrity(message) => CoreError::Integrity(message),
            other => CoreError::Store(other),
        }
    }
}

impl From<datalayer_crypto::CryptoError> for CoreError {
    fn from(err: datalayer_crypto::CryptoError) -> Self {
        CoreError::Integrity(err.to_string())
    }
}
