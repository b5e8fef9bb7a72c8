//! # Data Layer Core
//!
//! Versioned, content-addressed binary Merkle key/value trees.
//!
//! This crate provides:
//! - **DataStore**: Tree registry, node store and per-tree root log behind one lock
//! - **Tree engine**: Insert, delete, automatic placement and batch updates
//! - **Proofs**: Proofs of inclusion for any node under any historical root
//! - **Diffs**: Key/value differences between two roots, pruning shared subtrees
//! - **Replication**: Full and delta snapshot files, applied generation by generation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     DataStore (lock + Transaction)      │
//! ├─────────────┬─────────────┬─────────────┤
//! │ Tree Engine │ Proof / Diff│ Replication │
//! ├─────────────┴─────────────┴─────────────┤
//! │      Heritage (ancestor paths)          │
//! ├─────────────────────────────────────────┤
//! │        StorageBackend (store crate)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use datalayer_core::DataStore;
//! use datalayer_crypto::Bytes32;
//! use datalayer_store::Side;
//!
//! # async fn example() -> datalayer_core::Result<()> {
//! let store = DataStore::memory();
//! let tree_id = Bytes32::new([1; 32]);
//! store.create_tree(tree_id).await?;
//!
//! let a = store.insert(tree_id, &b"a"[..], &b"1"[..], None, None).await?;
//! store.insert(tree_id, &b"b"[..], &b"2"[..], Some(a), Some(Side::Right)).await?;
//!
//! let proof = store.get_proof_of_inclusion_by_key(tree_id, b"b").await?;
//! assert!(proof.is_valid());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod heritage;
pub mod integrity;
pub mod proof;
pub mod replication;
pub mod store;
pub mod tree;
pub mod types;

pub use config::DataStoreConfig;
pub use error::{CoreError, ErrorKind, Result};
pub use proof::{ProofOfInclusion, ProofOfInclusionLayer};
pub use replication::{
    delta_filename, full_filename, DeltaSource, GapPolicy, LocalDirSource, ReplicationError,
    ReplicationOptions,
};
pub use store::{DataStore, Transaction};
pub use tree::auto_side;
pub use types::{Change, DiffEntry, KeyValue, OperationType, Placement, TreeNodeView};
