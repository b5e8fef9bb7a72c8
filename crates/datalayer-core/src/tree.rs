//! Tree mutation and key/value reads
//!
//! Mutations never touch existing nodes. Inserting or deleting writes the new
//! nodes along one path and rewrites every ancestor up to a new root, which is
//! appended to the tree's root log. Shape depends only on insertion order and
//! placement; there is no rebalancing.

use crate::{
    Change, CoreError, DataStore, KeyValue, Placement, Result, Transaction, TreeNodeView,
};
use bytes::Bytes;
use datalayer_crypto::Bytes32;
use datalayer_store::{InternalNode, Node, Side, StorageBackend, TerminalNode};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, instrument};

/// Side chosen for an automatically placed terminal
pub fn auto_side(terminal_hash: &Bytes32) -> Side {
    if terminal_hash.as_bytes()[31] & 1 == 0 {
        Side::Left
    } else {
        Side::Right
    }
}

impl<B: StorageBackend> Transaction<'_, B> {
    /// Terminals under `root`, left to right
    pub(crate) async fn terminals_under(&self, root: Option<Bytes32>) -> Result<Vec<TerminalNode>> {
        let mut terminals = Vec::new();
        let mut stack: Vec<Bytes32> = root.into_iter().collect();
        while let Some(hash) = stack.pop() {
            match self.get_node(hash).await? {
                Node::Terminal(terminal) => terminals.push(terminal),
                Node::Internal(internal) => {
                    stack.push(internal.right_hash);
                    stack.push(internal.left_hash);
                }
            }
        }
        Ok(terminals)
    }

    /// The terminal holding `key` under `root`
    pub(crate) async fn find_terminal(
        &self,
        root: Option<Bytes32>,
        key: &[u8],
    ) -> Result<Option<TerminalNode>> {
        let mut stack: Vec<Bytes32> = root.into_iter().collect();
        while let Some(hash) = stack.pop() {
            match self.get_node(hash).await? {
                Node::Terminal(terminal) if terminal.key.as_ref() == key => {
                    return Ok(Some(terminal))
                }
                Node::Terminal(_) => {}
                Node::Internal(internal) => {
                    stack.push(internal.right_hash);
                    stack.push(internal.left_hash);
                }
            }
        }
        Ok(None)
    }

    /// The shallowest terminal under `root`, leftmost on ties
    async fn shallowest_terminal(&self, root: Bytes32) -> Result<Bytes32> {
        let mut queue = VecDeque::from([root]);
        while let Some(hash) = queue.pop_front() {
            match self.get_node(hash).await? {
                Node::Terminal(terminal) => return Ok(terminal.hash),
                Node::Internal(internal) => {
                    queue.push_back(internal.left_hash);
                    queue.push_back(internal.right_hash);
                }
            }
        }
        Err(CoreError::Integrity(format!("no terminal under {root}")))
    }

    /// Rewrite `ancestors` (nearest first) substituting `old` with `new`; returns the new top
    async fn rewrite_ancestors(
        &mut self,
        ancestors: &[Node],
        mut old: Bytes32,
        mut new: Bytes32,
    ) -> Result<Bytes32> {
        for ancestor in ancestors {
            let internal = ancestor.as_internal().ok_or_else(|| {
                CoreError::Integrity(format!("ancestor {} is a terminal", ancestor.hash()))
            })?;
            let replaced = internal.replace_child(&old, new).ok_or_else(|| {
                CoreError::Integrity(format!("{old} is not a child of {}", internal.hash))
            })?;
            old = internal.hash;
            new = self.put_node(replaced.into()).await?;
        }
        Ok(new)
    }

    /// Insert under a working root, returning the new terminal and the new top
    async fn insert_at(
        &mut self,
        tree_id: Bytes32,
        root: Option<Bytes32>,
        key: Bytes,
        value: Bytes,
        placement: Option<Placement>,
    ) -> Result<(Bytes32, Bytes32)> {
        if self.find_terminal(root, &key).await?.is_some() {
            return Err(CoreError::duplicate_key(tree_id, &key));
        }

        let Some(root) = root else {
            if placement.is_some() {
                return Err(CoreError::InvalidReference(
                    "reference node and side must be absent for an empty tree".to_string(),
                ));
            }
            let hash = self.put_node(TerminalNode::new(key, value).into()).await?;
            return Ok((hash, hash));
        };

        let Placement {
            reference_node_hash,
            side,
        } = placement.ok_or_else(|| {
            CoreError::InvalidReference(
                "reference node and side are required for a non-empty tree".to_string(),
            )
        })?;
        if let Some(Node::Internal(_)) = self.find_node(reference_node_hash).await? {
            return Err(CoreError::InvalidReference(format!(
                "reference node {reference_node_hash} is not a terminal"
            )));
        }
        let heritage = self
            .heritage_under(tree_id, root, reference_node_hash)
            .await?;

        let terminal = self.put_node(TerminalNode::new(key, value).into()).await?;
        let joined = self
            .put_node(InternalNode::from_side(terminal, side, reference_node_hash).into())
            .await?;
        let top = self
            .rewrite_ancestors(&heritage[1..], reference_node_hash, joined)
            .await?;
        Ok((terminal, top))
    }

    /// Placement chosen automatically for a terminal about to join a non-empty tree
    async fn auto_placement(&self, root: Bytes32, key: &[u8], value: &[u8]) -> Result<Placement> {
        let reference_node_hash = self.shallowest_terminal(root).await?;
        let side = auto_side(&datalayer_crypto::leaf_hash(key, value));
        Ok(Placement::new(reference_node_hash, side))
    }

    /// Delete under a working root, returning the new top
    async fn delete_at(
        &mut self,
        tree_id: Bytes32,
        root: Option<Bytes32>,
        key: &[u8],
    ) -> Result<Option<Bytes32>> {
        let root = root.ok_or(CoreError::EmptyTree(tree_id))?;
        let terminal = self
            .find_terminal(Some(root), key)
            .await?
            .ok_or_else(|| CoreError::key_not_found(tree_id, key))?;

        let heritage = self.heritage_under(tree_id, root, terminal.hash).await?;
        let Some(parent) = heritage.get(1) else {
            // The terminal was the root
            return Ok(None);
        };
        let parent = parent.as_internal().ok_or_else(|| {
            CoreError::Integrity(format!("parent {} is a terminal", parent.hash()))
        })?;
        let side = parent.side_of(&terminal.hash).ok_or_else(|| {
            CoreError::Integrity(format!("{} is not a child of {}", terminal.hash, parent.hash))
        })?;
        let sibling = parent.child(side.other());

        let top = self
            .rewrite_ancestors(&heritage[2..], parent.hash, sibling)
            .await?;
        Ok(Some(top))
    }

    /// Insert a key next to a reference terminal; returns the new terminal's hash
    ///
    /// An empty tree takes neither a reference nor a side; a non-empty tree needs both.
    #[instrument(skip(self, key, value))]
    pub async fn insert(
        &mut self,
        tree_id: Bytes32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        reference_node_hash: Option<Bytes32>,
        side: Option<Side>,
    ) -> Result<Bytes32> {
        let placement = match (reference_node_hash, side) {
            (Some(reference), Some(side)) => Some(Placement::new(reference, side)),
            (None, None) => None,
            _ => {
                return Err(CoreError::InvalidReference(
                    "reference node and side must be given together".to_string(),
                ))
            }
        };
        let root = self.get_tree_root(tree_id).await?;
        let (terminal, top) = self
            .insert_at(tree_id, root.node_hash, key.into(), value.into(), placement)
            .await?;
        self.append_root(tree_id, Some(top)).await?;
        debug!(%terminal, "Inserted terminal");
        Ok(terminal)
    }

    /// Insert a key, choosing the placement automatically
    #[instrument(skip(self, key, value))]
    pub async fn autoinsert(
        &mut self,
        tree_id: Bytes32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<Bytes32> {
        let (key, value) = (key.into(), value.into());
        let root = self.get_tree_root(tree_id).await?;
        let placement = match root.node_hash {
            Some(top) => Some(self.auto_placement(top, &key, &value).await?),
            None => None,
        };
        let (terminal, top) = self
            .insert_at(tree_id, root.node_hash, key, value, placement)
            .await?;
        self.append_root(tree_id, Some(top)).await?;
        Ok(terminal)
    }

    /// Delete a key, promoting its sibling into the parent's slot
    #[instrument(skip(self, key))]
    pub async fn delete(&mut self, tree_id: Bytes32, key: &[u8]) -> Result<()> {
        let root = self.get_tree_root(tree_id).await?;
        let top = self.delete_at(tree_id, root.node_hash, key).await?;
        self.append_root(tree_id, top).await?;
        Ok(())
    }

    /// Apply a changelist in order and append a single root
    ///
    /// Each change sees the effects of the ones before it. Fails with
    /// `EmptyEffectiveChange` if the final root equals the starting one.
    #[instrument(skip(self, changes), fields(changes = changes.len()))]
    pub async fn batch_update(
        &mut self,
        tree_id: Bytes32,
        changes: Vec<Change>,
    ) -> Result<Option<Bytes32>> {
        let start = self.get_tree_root(tree_id).await?.node_hash;
        let mut working = start;

        for change in changes {
            working = match change {
                Change::Insert {
                    key,
                    value,
                    placement,
                } => {
                    let placement = match (placement, working) {
                        (None, Some(top)) => Some(self.auto_placement(top, &key, &value).await?),
                        (placement, _) => placement,
                    };
                    let (_, top) = self
                        .insert_at(tree_id, working, key, value, placement)
                        .await?;
                    Some(top)
                }
                Change::Delete { key } => self.delete_at(tree_id, working, &key).await?,
            };
        }

        if working == start {
            return Err(CoreError::EmptyEffectiveChange(tree_id));
        }
        self.append_root(tree_id, working).await?;
        Ok(working)
    }

    /// Every key/value pair, left to right
    ///
    /// Reads the latest root unless `root_hash` names one from the tree's history.
    pub async fn get_keys_values(
        &self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Vec<KeyValue>> {
        let root = self.resolve_root(tree_id, root_hash).await?;
        Ok(self
            .terminals_under(root)
            .await?
            .into_iter()
            .map(|terminal| KeyValue {
                hash: terminal.hash,
                key: terminal.key,
                value: terminal.value,
            })
            .collect())
    }

    /// Every key, left to right
    pub async fn get_keys(&self, tree_id: Bytes32, root_hash: Option<Bytes32>) -> Result<Vec<Bytes>> {
        let root = self.resolve_root(tree_id, root_hash).await?;
        Ok(self
            .terminals_under(root)
            .await?
            .into_iter()
            .map(|terminal| terminal.key)
            .collect())
    }

    /// The terminal holding `key` in the latest root
    pub async fn get_node_by_key(&self, tree_id: Bytes32, key: &[u8]) -> Result<TerminalNode> {
        let root = self.get_tree_root(tree_id).await?;
        self.find_terminal(root.node_hash, key)
            .await?
            .ok_or_else(|| CoreError::key_not_found(tree_id, key))
    }

    /// The value stored under `key` in the latest root
    pub async fn get_value(&self, tree_id: Bytes32, key: &[u8]) -> Result<Bytes> {
        Ok(self.get_node_by_key(tree_id, key).await?.value)
    }

    /// The latest root materialised as nested nodes, `None` when empty
    pub async fn get_tree_as_nodes(&self, tree_id: Bytes32) -> Result<Option<TreeNodeView>> {
        let Some(root) = self.get_tree_root(tree_id).await?.node_hash else {
            return Ok(None);
        };

        let mut built: HashMap<Bytes32, TreeNodeView> = HashMap::new();
        let mut stack = vec![(root, false)];
        while let Some((hash, expanded)) = stack.pop() {
            match self.get_node(hash).await? {
                Node::Terminal(terminal) => {
                    built.insert(
                        hash,
                        TreeNodeView::Terminal {
                            hash,
                            key: terminal.key,
                            value: terminal.value,
                        },
                    );
                }
                Node::Internal(internal) if !expanded => {
                    stack.push((hash, true));
                    stack.push((internal.right_hash, false));
                    stack.push((internal.left_hash, false));
                }
                Node::Internal(internal) => {
                    let mut take = |child: Bytes32| {
                        built.remove(&child).map(Box::new).ok_or_else(|| {
                            CoreError::Integrity(format!("child {child} of {hash} not materialised"))
                        })
                    };
                    let left = take(internal.left_hash)?;
                    let right = take(internal.right_hash)?;
                    built.insert(hash, TreeNodeView::Internal { hash, left, right });
                }
            }
        }

        built
            .remove(&root)
            .map(Some)
            .ok_or_else(|| CoreError::Integrity(format!("root {root} not materialised")))
    }
}

impl<B: StorageBackend> DataStore<B> {
    /// Insert a key next to a reference terminal; returns the new terminal's hash
    pub async fn insert(
        &self,
        tree_id: Bytes32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        reference_node_hash: Option<Bytes32>,
        side: Option<Side>,
    ) -> Result<Bytes32> {
        let mut tx = self.transaction().await?;
        let hash = tx
            .insert(tree_id, key, value, reference_node_hash, side)
            .await?;
        tx.commit().await?;
        Ok(hash)
    }

    /// Insert a key, choosing the placement automatically
    pub async fn autoinsert(
        &self,
        tree_id: Bytes32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<Bytes32> {
        let mut tx = self.transaction().await?;
        let hash = tx.autoinsert(tree_id, key, value).await?;
        tx.commit().await?;
        Ok(hash)
    }

    /// Delete a key
    pub async fn delete(&self, tree_id: Bytes32, key: &[u8]) -> Result<()> {
        let mut tx = self.transaction().await?;
        tx.delete(tree_id, key).await?;
        tx.commit().await
    }

    /// Apply a changelist as one new generation; returns the new root hash
    pub async fn batch_update(
        &self,
        tree_id: Bytes32,
        changes: Vec<Change>,
    ) -> Result<Option<Bytes32>> {
        let mut tx = self.transaction().await?;
        let root = tx.batch_update(tree_id, changes).await?;
        tx.commit().await?;
        Ok(root)
    }

    /// Every key/value pair, left to right
    pub async fn get_keys_values(
        &self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Vec<KeyValue>> {
        self.transaction()
            .await?
            .get_keys_values(tree_id, root_hash)
            .await
    }

    /// Every key, left to right
    pub async fn get_keys(&self, tree_id: Bytes32, root_hash: Option<Bytes32>) -> Result<Vec<Bytes>> {
        self.transaction().await?.get_keys(tree_id, root_hash).await
    }

    /// The terminal holding `key`
    pub async fn get_node_by_key(&self, tree_id: Bytes32, key: &[u8]) -> Result<TerminalNode> {
        self.transaction().await?.get_node_by_key(tree_id, key).await
    }

    /// The value stored under `key`
    pub async fn get_value(&self, tree_id: Bytes32, key: &[u8]) -> Result<Bytes> {
        self.transaction().await?.get_value(tree_id, key).await
    }

    /// The latest root materialised as nested nodes
    pub async fn get_tree_as_nodes(&self, tree_id: Bytes32) -> Result<Option<TreeNodeView>> {
        self.transaction().await?.get_tree_as_nodes(tree_id).await
    }
}
