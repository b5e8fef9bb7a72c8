//! Full and delta snapshot files

use super::codec::{decode_records, encode_records};
use super::{ReplicationError, Result};
use crate::{DataStore, Transaction};
use bytes::Bytes;
use datalayer_crypto::Bytes32;
use datalayer_store::{Node, Root, StorageBackend};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const FILE_VERSION: &str = "v1.0";

/// Name of the full snapshot file for a root
pub fn full_filename(tree_id: &Bytes32, node_hash: Option<Bytes32>, generation: u32) -> String {
    format!(
        "{}-{}-{generation}-{FILE_VERSION}.dat",
        tree_id.to_hex(),
        Bytes32::from_option(node_hash).to_hex()
    )
}

/// Name of the delta file for a root
pub fn delta_filename(tree_id: &Bytes32, node_hash: Option<Bytes32>, generation: u32) -> String {
    format!(
        "{}-{}-delta-{generation}-{FILE_VERSION}.dat",
        tree_id.to_hex(),
        Bytes32::from_option(node_hash).to_hex()
    )
}

impl<B: StorageBackend> Transaction<'_, B> {
    /// Nodes under `root` not in `known`, children before parents
    async fn post_order(
        &self,
        root: Option<Bytes32>,
        known: &HashSet<Bytes32>,
    ) -> crate::Result<Vec<Node>> {
        let mut out = Vec::new();
        let mut emitted = HashSet::new();
        let mut stack: Vec<(Bytes32, bool)> = root.into_iter().map(|hash| (hash, false)).collect();

        while let Some((hash, expanded)) = stack.pop() {
            if known.contains(&hash) || emitted.contains(&hash) {
                continue;
            }
            let node = self.get_node(hash).await?;
            match &node {
                Node::Internal(internal) if !expanded => {
                    stack.push((hash, true));
                    stack.push((internal.right_hash, false));
                    stack.push((internal.left_hash, false));
                }
                _ => {
                    emitted.insert(hash);
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    async fn subtree_hashes(&self, root: Option<Bytes32>) -> crate::Result<HashSet<Bytes32>> {
        Ok(self
            .post_order(root, &HashSet::new())
            .await?
            .iter()
            .map(Node::hash)
            .collect())
    }

    /// Every node under the root at `generation`, as a record stream
    pub async fn export_full(&self, tree_id: Bytes32, generation: u32) -> crate::Result<Bytes> {
        let root = self.get_tree_root_at(tree_id, generation).await?;
        let nodes = self.post_order(root.node_hash, &HashSet::new()).await?;
        encode_records(&nodes)
    }

    /// Nodes under the root at `generation` that were not under the one before it
    pub async fn export_delta(&self, tree_id: Bytes32, generation: u32) -> crate::Result<Bytes> {
        let root = self.get_tree_root_at(tree_id, generation).await?;
        let known = match generation.checked_sub(1) {
            Some(previous) => {
                let previous = self.get_tree_root_at(tree_id, previous).await?;
                self.subtree_hashes(previous.node_hash).await?
            }
            None => HashSet::new(),
        };
        let nodes = self.post_order(root.node_hash, &known).await?;
        debug!(%tree_id, generation, nodes = nodes.len(), "Delta exported");
        encode_records(&nodes)
    }

    /// Insert every record of a file and append `root_hash` as the next generation
    pub async fn apply_records(
        &mut self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
        data: Bytes,
    ) -> Result<Root> {
        let records = decode_records(data)?;
        for record in &records {
            self.insert_raw(record.node_type(), &record.value1, &record.value2)
                .await?;
        }
        let root = self.append_root(tree_id, root_hash).await?;
        debug!(%tree_id, generation = root.generation, records = records.len(), "File applied");
        Ok(root)
    }
}

impl<B: StorageBackend> DataStore<B> {
    /// Every node under the root at `generation`, as a record stream
    pub async fn export_full(&self, tree_id: Bytes32, generation: u32) -> crate::Result<Bytes> {
        self.transaction()
            .await?
            .export_full(tree_id, generation)
            .await
    }

    /// Nodes new in `generation`, as a record stream
    pub async fn export_delta(&self, tree_id: Bytes32, generation: u32) -> crate::Result<Bytes> {
        self.transaction()
            .await?
            .export_delta(tree_id, generation)
            .await
    }

    /// Write the full and delta files for a generation into `folder`
    ///
    /// Returns the paths of the full file and the delta file.
    #[instrument(skip(self, folder), fields(folder = %folder.as_ref().display()))]
    pub async fn write_files_for_root(
        &self,
        tree_id: Bytes32,
        generation: u32,
        folder: impl AsRef<Path>,
    ) -> Result<(PathBuf, PathBuf)> {
        let (root, full, delta) = {
            let tx = self.transaction().await?;
            let root = tx.get_tree_root_at(tree_id, generation).await?;
            let full = tx.export_full(tree_id, generation).await?;
            let delta = tx.export_delta(tree_id, generation).await?;
            (root, full, delta)
        };

        let folder = folder.as_ref();
        tokio::fs::create_dir_all(folder).await?;
        let full_path = folder.join(full_filename(&tree_id, root.node_hash, generation));
        let delta_path = folder.join(delta_filename(&tree_id, root.node_hash, generation));
        tokio::fs::write(&full_path, &full).await?;
        tokio::fs::write(&delta_path, &delta).await?;

        info!(full = full.len(), delta = delta.len(), "Snapshot files written");
        Ok((full_path, delta_path))
    }

    /// Rebuild a root from a full snapshot as the tree's next generation
    pub async fn apply_full(
        &self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
        data: Bytes,
    ) -> Result<Root> {
        let mut tx = self.transaction().await?;
        let root = tx.apply_records(tree_id, root_hash, data).await?;
        tx.commit().await?;
        Ok(root)
    }
}
