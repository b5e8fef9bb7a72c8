//! In-memory backend for testing and ephemeral stores

use crate::{GenerationRange, HistoryOrder, Node, Result, Root, StorageBackend, StoreError, WriteBatch};
use async_trait::async_trait;
use datalayer_crypto::Bytes32;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    nodes: HashMap<Bytes32, Node>,
    trees: BTreeSet<Bytes32>,
    roots: BTreeMap<(Bytes32, u32), Root>,
}

/// An in-memory backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        let tables = self.tables.read();
        tables.nodes.is_empty() && tables.trees.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get_node(&self, hash: &Bytes32) -> Result<Option<Node>> {
        Ok(self.tables.read().nodes.get(hash).cloned())
    }

    async fn has_node(&self, hash: &Bytes32) -> Result<bool> {
        Ok(self.tables.read().nodes.contains_key(hash))
    }

    async fn all_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.tables.read().nodes.values().cloned().collect())
    }

    async fn node_count(&self) -> Result<u64> {
        Ok(self.tables.read().nodes.len() as u64)
    }

    async fn tree_ids(&self) -> Result<BTreeSet<Bytes32>> {
        Ok(self.tables.read().trees.clone())
    }

    async fn has_tree(&self, tree_id: &Bytes32) -> Result<bool> {
        Ok(self.tables.read().trees.contains(tree_id))
    }

    async fn latest_root(&self, tree_id: &Bytes32) -> Result<Option<Root>> {
        let tables = self.tables.read();
        Ok(tables
            .roots
            .range((*tree_id, 0)..=(*tree_id, u32::MAX))
            .next_back()
            .map(|(_, root)| *root))
    }

    async fn root_at(&self, tree_id: &Bytes32, generation: u32) -> Result<Option<Root>> {
        Ok(self.tables.read().roots.get(&(*tree_id, generation)).copied())
    }

    async fn roots(&self, tree_id: &Bytes32, range: GenerationRange) -> Result<Vec<Root>> {
        let tables = self.tables.read();
        let min = range.min.unwrap_or(0);
        let max = range.max.unwrap_or(u32::MAX);
        if min > max {
            return Ok(Vec::new());
        }
        let rows = tables
            .roots
            .range((*tree_id, min)..=(*tree_id, max))
            .map(|(_, root)| *root);
        let limit = range.limit.unwrap_or(usize::MAX);
        Ok(match range.order {
            HistoryOrder::Ascending => rows.take(limit).collect(),
            HistoryOrder::Descending => rows.rev().take(limit).collect(),
        })
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut tables = self.tables.write();

        // Validate the whole batch before touching anything
        let mut new_trees = BTreeSet::new();
        for tree_id in &batch.trees {
            if tables.trees.contains(tree_id) || !new_trees.insert(*tree_id) {
                return Err(StoreError::TreeAlreadyExists(*tree_id));
            }
        }
        let mut new_roots = BTreeSet::new();
        for root in &batch.roots {
            if !tables.trees.contains(&root.tree_id) && !new_trees.contains(&root.tree_id) {
                return Err(StoreError::TreeNotFound(root.tree_id));
            }
            let key = (root.tree_id, root.generation);
            if tables.roots.contains_key(&key) || !new_roots.insert(key) {
                return Err(StoreError::RootConflict {
                    tree_id: root.tree_id,
                    generation: root.generation,
                });
            }
        }

        tables.trees.extend(batch.trees);
        for node in batch.nodes {
            tables.nodes.entry(node.hash()).or_insert(node);
        }
        for root in batch.roots {
            tables.roots.insert((root.tree_id, root.generation), root);
        }
        Ok(())
    }
}
