//! # Data Layer Store
//!
//! Storage substrate for the Data Layer Merkle key/value store.
//!
//! This crate provides:
//! - **Node types**: Immutable terminal and internal nodes addressed by hash
//! - **Root log**: Per-tree append-only generation -> root hash rows
//! - **Backends**: In-memory and SQLite implementations of [`StorageBackend`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        datalayer-core (DataStore)       │
//! ├─────────────────────────────────────────┤
//! │          StorageBackend Trait           │
//! ├─────────────┬─────────────┬─────────────┤
//! │MemoryBackend│SqliteBackend│  Flexible   │
//! └─────────────┴─────────────┴─────────────┘
//! ```
//!
//! Backends are deliberately dumb: they answer lookups and apply a
//! [`WriteBatch`] atomically. Hash validation, reachability and generation
//! bookkeeping live in the core crate's transaction layer.

pub mod error;
pub mod flexible;
pub mod memory;
pub mod node;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use flexible::FlexibleBackend;
pub use memory::MemoryBackend;
pub use node::{InternalNode, Node, NodeType, Root, Side, TerminalNode};
pub use sqlite::{SqliteBackend, SqliteConfig};

use async_trait::async_trait;
use datalayer_crypto::Bytes32;
use std::collections::BTreeSet;

/// Order of root log rows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistoryOrder {
    /// Oldest generation first
    #[default]
    Ascending,
    /// Most recent generation first
    Descending,
}

/// Inclusive generation bounds for root log queries
///
/// The limit applies after ordering, so a descending range with a limit keeps
/// the most recent rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub limit: Option<usize>,
    pub order: HistoryOrder,
}

impl GenerationRange {
    /// Every generation
    pub fn all() -> Self {
        Self::default()
    }

    /// Generations in `min..=max`
    pub fn between(min: u32, max: u32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::default()
        }
    }

    /// The `count` most recent generations, newest first
    pub fn latest(count: usize) -> Self {
        Self::all().descending().with_limit(count)
    }

    /// Return rows most recent first
    pub fn descending(mut self) -> Self {
        self.order = HistoryOrder::Descending;
        self
    }

    /// Keep at most `limit` rows
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check whether a generation is inside the bounds (ignores the limit)
    pub fn contains(&self, generation: u32) -> bool {
        self.min.map_or(true, |min| generation >= min) && self.max.map_or(true, |max| generation <= max)
    }
}

/// Rows staged by one transaction, applied all-or-nothing by [`StorageBackend::commit`]
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    /// New tree ids
    pub trees: Vec<Bytes32>,
    /// New nodes, children before parents
    pub nodes: Vec<Node>,
    /// New root rows, in generation order per tree
    pub roots: Vec<Root>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty() && self.nodes.is_empty() && self.roots.is_empty()
    }
}

/// Trait for storage substrates
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve a node by hash
    async fn get_node(&self, hash: &Bytes32) -> Result<Option<Node>>;

    /// Check if a node exists
    async fn has_node(&self, hash: &Bytes32) -> Result<bool> {
        Ok(self.get_node(hash).await?.is_some())
    }

    /// Every stored node, for integrity checks
    async fn all_nodes(&self) -> Result<Vec<Node>>;

    /// Number of stored nodes
    async fn node_count(&self) -> Result<u64>;

    /// All registered tree ids
    async fn tree_ids(&self) -> Result<BTreeSet<Bytes32>>;

    /// Check if a tree id is registered
    async fn has_tree(&self, tree_id: &Bytes32) -> Result<bool>;

    /// The root with the highest generation
    async fn latest_root(&self, tree_id: &Bytes32) -> Result<Option<Root>>;

    /// The root at an exact generation
    async fn root_at(&self, tree_id: &Bytes32, generation: u32) -> Result<Option<Root>>;

    /// Roots inside `range`, ascending by generation
    async fn roots(&self, tree_id: &Bytes32, range: GenerationRange) -> Result<Vec<Root>>;

    /// Apply a batch atomically
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
