//! Key/value diff between two roots
//!
//! Both trees are walked one level at a time. Any hash present on both
//! frontiers names an identical subtree and is dropped from both, so shared
//! structure is never descended into.

use crate::{DataStore, DiffEntry, Result, Transaction};
use datalayer_crypto::Bytes32;
use datalayer_store::{Node, StorageBackend, TerminalNode};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

impl<B: StorageBackend> Transaction<'_, B> {
    /// Terminals reached on one side after pruning subtrees shared with the other
    async fn expand_frontier(
        &self,
        frontier: &HashSet<Bytes32>,
        terminals: &mut HashMap<Bytes32, TerminalNode>,
    ) -> Result<HashSet<Bytes32>> {
        let mut next = HashSet::new();
        for hash in frontier {
            match self.get_node(*hash).await? {
                Node::Terminal(terminal) => {
                    terminals.insert(terminal.hash, terminal);
                }
                Node::Internal(internal) => {
                    next.insert(internal.left_hash);
                    next.insert(internal.right_hash);
                }
            }
        }
        Ok(next)
    }

    /// Pairs only under `hash_1` become deletes, pairs only under `hash_2` inserts
    ///
    /// `None` stands for the empty tree; any other hash must be one of the tree's
    /// historical roots.
    #[instrument(skip(self))]
    pub async fn get_kv_diff(
        &self,
        tree_id: Bytes32,
        hash_1: Option<Bytes32>,
        hash_2: Option<Bytes32>,
    ) -> Result<Vec<DiffEntry>> {
        let mut frontier_1: HashSet<Bytes32> = HashSet::new();
        let mut frontier_2: HashSet<Bytes32> = HashSet::new();
        for (hash, frontier) in [(hash_1, &mut frontier_1), (hash_2, &mut frontier_2)] {
            if let Some(hash) = hash {
                self.resolve_root(tree_id, Some(hash)).await?;
                frontier.insert(hash);
            } else {
                // The empty tree is always comparable, but the tree must exist
                self.get_tree_root(tree_id).await?;
            }
        }

        let mut terminals_1 = HashMap::new();
        let mut terminals_2 = HashMap::new();
        let mut level = 0usize;
        while !(frontier_1.is_empty() && frontier_2.is_empty()) {
            let shared: Vec<Bytes32> = frontier_1.intersection(&frontier_2).copied().collect();
            for hash in &shared {
                frontier_1.remove(hash);
                frontier_2.remove(hash);
            }
            debug!(level, pruned = shared.len(), "Diff level");

            frontier_1 = self.expand_frontier(&frontier_1, &mut terminals_1).await?;
            frontier_2 = self.expand_frontier(&frontier_2, &mut terminals_2).await?;
            level += 1;
        }

        let mut entries: Vec<DiffEntry> = terminals_1
            .iter()
            .filter(|(hash, _)| !terminals_2.contains_key(*hash))
            .map(|(_, t)| DiffEntry::delete(t.key.clone(), t.value.clone()))
            .chain(
                terminals_2
                    .iter()
                    .filter(|(hash, _)| !terminals_1.contains_key(*hash))
                    .map(|(_, t)| DiffEntry::insert(t.key.clone(), t.value.clone())),
            )
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key).then(a.op.cmp(&b.op)));
        Ok(entries)
    }
}

impl<B: StorageBackend> DataStore<B> {
    /// Key/value differences between two roots of a tree
    pub async fn get_kv_diff(
        &self,
        tree_id: Bytes32,
        hash_1: Option<Bytes32>,
        hash_2: Option<Bytes32>,
    ) -> Result<Vec<DiffEntry>> {
        self.transaction()
            .await?
            .get_kv_diff(tree_id, hash_1, hash_2)
            .await
    }
}
