//! Backend chosen at runtime

use crate::{
    GenerationRange, MemoryBackend, Node, Result, Root, SqliteBackend, SqliteConfig,
    StorageBackend, WriteBatch,
};
use async_trait::async_trait;
use datalayer_crypto::Bytes32;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Either backend behind one concrete type
#[derive(Clone)]
pub enum FlexibleBackend {
    /// SQLite database
    Sqlite(SqliteBackend),
    /// In-memory storage
    Memory(MemoryBackend),
}

impl FlexibleBackend {
    /// Open SQLite from config, falling back to memory if the database cannot be opened
    pub async fn sqlite_or_memory(config: &SqliteConfig) -> Self {
        match SqliteBackend::connect(config).await {
            Ok(backend) => {
                info!("Using SQLite backend");
                Self::Sqlite(backend)
            }
            Err(e) => {
                warn!(error = %e, "Failed to open SQLite database, using in-memory storage");
                Self::Memory(MemoryBackend::new())
            }
        }
    }

    /// Check if data survives a restart
    pub fn is_persistent(&self) -> bool {
        match self {
            Self::Sqlite(backend) => backend.is_file_backed(),
            Self::Memory(_) => false,
        }
    }
}

impl From<MemoryBackend> for FlexibleBackend {
    fn from(backend: MemoryBackend) -> Self {
        Self::Memory(backend)
    }
}

impl From<SqliteBackend> for FlexibleBackend {
    fn from(backend: SqliteBackend) -> Self {
        Self::Sqlite(backend)
    }
}

#[async_trait]
impl StorageBackend for FlexibleBackend {
    async fn get_node(&self, hash: &Bytes32) -> Result<Option<Node>> {
        match self {
            Self::Sqlite(backend) => backend.get_node(hash).await,
            Self::Memory(backend) => backend.get_node(hash).await,
        }
    }

    async fn has_node(&self, hash: &Bytes32) -> Result<bool> {
        match self {
            Self::Sqlite(backend) => backend.has_node(hash).await,
            Self::Memory(backend) => backend.has_node(hash).await,
        }
    }

    async fn all_nodes(&self) -> Result<Vec<Node>> {
        match self {
            Self::Sqlite(backend) => backend.all_nodes().await,
            Self::Memory(backend) => backend.all_nodes().await,
        }
    }

    async fn node_count(&self) -> Result<u64> {
        match self {
            Self::Sqlite(backend) => backend.node_count().await,
            Self::Memory(backend) => backend.node_count().await,
        }
    }

    async fn tree_ids(&self) -> Result<BTreeSet<Bytes32>> {
        match self {
            Self::Sqlite(backend) => backend.tree_ids().await,
            Self::Memory(backend) => backend.tree_ids().await,
        }
    }

    async fn has_tree(&self, tree_id: &Bytes32) -> Result<bool> {
        match self {
            Self::Sqlite(backend) => backend.has_tree(tree_id).await,
            Self::Memory(backend) => backend.has_tree(tree_id).await,
        }
    }

    async fn latest_root(&self, tree_id: &Bytes32) -> Result<Option<Root>> {
        match self {
            Self::Sqlite(backend) => backend.latest_root(tree_id).await,
            Self::Memory(backend) => backend.latest_root(tree_id).await,
        }
    }

    async fn root_at(&self, tree_id: &Bytes32, generation: u32) -> Result<Option<Root>> {
        match self {
            Self::Sqlite(backend) => backend.root_at(tree_id, generation).await,
            Self::Memory(backend) => backend.root_at(tree_id, generation).await,
        }
    }

    async fn roots(&self, tree_id: &Bytes32, range: GenerationRange) -> Result<Vec<Root>> {
        match self {
            Self::Sqlite(backend) => backend.roots(tree_id, range).await,
            Self::Memory(backend) => backend.roots(tree_id, range).await,
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        match self {
            Self::Sqlite(backend) => backend.commit(batch).await,
            Self::Memory(backend) => backend.commit(batch).await,
        }
    }
}
