//! Whole-store consistency check

use crate::{CoreError, DataStore, Result, Transaction};
use datalayer_store::{GenerationRange, Node, StorageBackend};
use tracing::{info, instrument};

impl<B: StorageBackend> Transaction<'_, B> {
    /// Verify committed data: node hashes, child references and root logs
    ///
    /// Every problem found is reported in a single `Integrity` error.
    #[instrument(skip(self))]
    pub async fn check_integrity(&self) -> Result<()> {
        let mut problems = Vec::new();

        let nodes = self.backend().all_nodes().await?;
        for node in &nodes {
            if !node.is_hash_valid() {
                problems.push(format!(
                    "node {} hashes to {}",
                    node.hash(),
                    node.computed_hash()
                ));
            }
            if let Node::Internal(internal) = node {
                for child in [internal.left_hash, internal.right_hash] {
                    if !self.has_node(child).await? {
                        problems.push(format!(
                            "node {} references missing child {child}",
                            internal.hash
                        ));
                    }
                }
            }
        }

        let tree_ids = self.backend().tree_ids().await?;
        for tree_id in &tree_ids {
            let roots = self.backend().roots(tree_id, GenerationRange::all()).await?;
            if roots.is_empty() {
                problems.push(format!("tree {tree_id} has no roots"));
            }
            for (expected, root) in roots.iter().enumerate() {
                if root.generation as usize != expected {
                    problems.push(format!(
                        "tree {tree_id} has generation {} where {expected} was expected",
                        root.generation
                    ));
                    break;
                }
            }
            for root in &roots {
                if let Some(hash) = root.node_hash {
                    if !self.has_node(hash).await? {
                        problems.push(format!(
                            "tree {tree_id} generation {} points at missing node {hash}",
                            root.generation
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            info!(nodes = nodes.len(), trees = tree_ids.len(), "Integrity check passed");
            Ok(())
        } else {
            Err(CoreError::Integrity(problems.join("; ")))
        }
    }
}

impl<B: StorageBackend> DataStore<B> {
    /// Verify committed data: node hashes, child references and root logs
    pub async fn check_integrity(&self) -> Result<()> {
        self.transaction().await?.check_integrity().await
    }
}
