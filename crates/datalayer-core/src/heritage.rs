//! Ancestor paths from a node up to a root

use crate::{CoreError, DataStore, Result, Transaction};
use datalayer_crypto::Bytes32;
use datalayer_store::{Node, StorageBackend};
use std::collections::{HashMap, VecDeque};

impl<B: StorageBackend> Transaction<'_, B> {
    /// The node followed by each ancestor up to `root`, leaf to root
    pub(crate) async fn heritage_under(
        &self,
        tree_id: Bytes32,
        root: Bytes32,
        node_hash: Bytes32,
    ) -> Result<Vec<Node>> {
        let mut parents: HashMap<Bytes32, Bytes32> = HashMap::new();
        let mut seen: HashMap<Bytes32, Node> = HashMap::new();
        let mut queue = VecDeque::from([root]);
        let mut found = false;

        while let Some(hash) = queue.pop_front() {
            let node = self.get_node(hash).await?;
            if let Node::Internal(internal) = &node {
                for child in [internal.left_hash, internal.right_hash] {
                    parents.entry(child).or_insert(hash);
                    queue.push_back(child);
                }
            }
            seen.insert(hash, node);
            if hash == node_hash {
                found = true;
                break;
            }
        }
        if !found {
            return Err(CoreError::NodeNotInTree { node_hash, tree_id });
        }

        let mut path = Vec::new();
        let mut current = node_hash;
        loop {
            let node = seen
                .remove(&current)
                .ok_or_else(|| CoreError::Integrity(format!("lost track of node {current}")))?;
            path.push(node);
            match parents.get(&current) {
                Some(parent) => current = *parent,
                None => break,
            }
        }
        Ok(path)
    }

    /// The node followed by every ancestor, ending at the root
    ///
    /// Uses the latest root unless `root_hash` names one from the tree's history.
    pub async fn get_heritage(
        &self,
        tree_id: Bytes32,
        node_hash: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Vec<Node>> {
        let root = self
            .resolve_root(tree_id, root_hash)
            .await?
            .ok_or(CoreError::EmptyTree(tree_id))?;
        self.heritage_under(tree_id, root, node_hash).await
    }

    /// Every ancestor of a node, nearest first
    pub async fn get_ancestors(
        &self,
        tree_id: Bytes32,
        node_hash: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Vec<Node>> {
        let mut heritage = self.get_heritage(tree_id, node_hash, root_hash).await?;
        heritage.remove(0);
        Ok(heritage)
    }
}

impl<B: StorageBackend> DataStore<B> {
    /// The node followed by every ancestor, ending at the root
    pub async fn get_heritage(
        &self,
        tree_id: Bytes32,
        node_hash: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Vec<Node>> {
        self.transaction()
            .await?
            .get_heritage(tree_id, node_hash, root_hash)
            .await
    }

    /// Every ancestor of a node, nearest first
    pub async fn get_ancestors(
        &self,
        tree_id: Bytes32,
        node_hash: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Vec<Node>> {
        self.transaction()
            .await?
            .get_ancestors(tree_id, node_hash, root_hash)
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{add_01234567_example, tree_id};
    use crate::{CoreError, DataStore};
    use datalayer_crypto::{leaf_hash, Bytes32};
    use datalayer_store::Side;

    #[tokio::test]
    async fn test_heritage_runs_leaf_to_root() {
        let store = DataStore::memory();
        let example = add_01234567_example(&store).await;

        let heritage = store
            .get_heritage(tree_id(), example.terminal_nodes[0], None)
            .await
            .unwrap();
        let hashes: Vec<Bytes32> = heritage.iter().map(|n| n.hash()).collect();

        assert_eq!(hashes.len(), 4);
        assert_eq!(hashes[0], example.terminal_nodes[0]);
        assert_eq!(hashes[1], example.internal_nodes[0]);
        assert_eq!(hashes[2], example.internal_nodes[4]);
        assert_eq!(
            hashes[3],
            store.get_tree_root(tree_id()).await.unwrap().node_hash.unwrap()
        );
    }

    #[tokio::test]
    async fn test_ancestors_exclude_node() {
        let store = DataStore::memory();
        let example = add_01234567_example(&store).await;

        let ancestors = store
            .get_ancestors(tree_id(), example.terminal_nodes[5], None)
            .await
            .unwrap();
        assert_eq!(ancestors.len(), 3);
        let parent = ancestors[0].as_internal().unwrap();
        assert_eq!(parent.side_of(&example.terminal_nodes[5]), Some(Side::Right));
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_in_tree() {
        let store = DataStore::memory();
        add_01234567_example(&store).await;

        let err = store
            .get_heritage(tree_id(), leaf_hash(b"nope", b""), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NodeNotInTree { .. }));
    }

    #[tokio::test]
    async fn test_empty_tree_has_no_heritage() {
        let store = DataStore::memory();
        store.create_tree(tree_id()).await.unwrap();
        let err = store
            .get_heritage(tree_id(), leaf_hash(b"a", b""), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EmptyTree(_)));
    }

    #[tokio::test]
    async fn test_heritage_under_historical_root() {
        let store = DataStore::memory();
        let example = add_01234567_example(&store).await;
        // Generation 1 holds only the first terminal
        let gen_one = store.get_tree_root_at(tree_id(), 1).await.unwrap();
        assert_eq!(gen_one.node_hash, Some(example.terminal_nodes[6]));

        let err = store
            .get_heritage(tree_id(), example.terminal_nodes[7], gen_one.node_hash)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NodeNotInTree { .. }));
    }
}
