//! The data store and its transaction context
//!
//! Every operation runs inside a [`Transaction`], which owns the store's single
//! lock for its whole lifetime. Writes are staged in the transaction and handed to
//! the backend as one [`WriteBatch`] on [`Transaction::commit`]; dropping a
//! transaction without committing discards them.

use crate::replication::check_record_len;
use crate::{CoreError, DataStoreConfig, Result};
use datalayer_crypto::Bytes32;
use datalayer_store::{
    GenerationRange, HistoryOrder, InternalNode, MemoryBackend, Node, NodeType, Root, SqliteBackend,
    StorageBackend, TerminalNode, WriteBatch,
};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// A versioned Merkle key/value store over a storage backend
pub struct DataStore<B: StorageBackend> {
    backend: B,
    lock: Mutex<()>,
    config: DataStoreConfig,
}

impl<B: StorageBackend> DataStore<B> {
    /// Create a store over a backend with default config
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, DataStoreConfig::default())
    }

    /// Create a store over a backend
    pub fn with_config(backend: B, config: DataStoreConfig) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
            config,
        }
    }

    /// The storage backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The store configuration
    pub fn config(&self) -> &DataStoreConfig {
        &self.config
    }

    /// Acquire the store lock and open a transaction
    pub async fn transaction(&self) -> Result<Transaction<'_, B>> {
        let guard = match self.config.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.lock.lock())
                .await
                .map_err(|_| CoreError::LockTimeout(timeout))?,
            None => self.lock.lock().await,
        };
        Ok(Transaction::new(guard, &self.backend))
    }

    /// Register a tree with an empty generation-0 root
    #[instrument(skip(self))]
    pub async fn create_tree(&self, tree_id: Bytes32) -> Result<()> {
        let mut tx = self.transaction().await?;
        tx.create_tree(tree_id).await?;
        tx.commit().await
    }

    /// All registered tree ids
    pub async fn get_tree_ids(&self) -> Result<BTreeSet<Bytes32>> {
        self.transaction().await?.get_tree_ids().await
    }

    /// Check if the latest root of a tree is empty
    pub async fn table_is_empty(&self, tree_id: Bytes32) -> Result<bool> {
        self.transaction().await?.table_is_empty(tree_id).await
    }

    /// The latest root of a tree
    pub async fn get_tree_root(&self, tree_id: Bytes32) -> Result<Root> {
        self.transaction().await?.get_tree_root(tree_id).await
    }

    /// The root at an exact generation
    pub async fn get_tree_root_at(&self, tree_id: Bytes32, generation: u32) -> Result<Root> {
        self.transaction()
            .await?
            .get_tree_root_at(tree_id, generation)
            .await
    }

    /// The latest generation of a tree
    pub async fn get_tree_generation(&self, tree_id: Bytes32) -> Result<u32> {
        self.transaction().await?.get_tree_generation(tree_id).await
    }

    /// Every root of a tree, most recent first
    pub async fn get_roots_history(&self, tree_id: Bytes32) -> Result<Vec<Root>> {
        self.transaction().await?.get_roots_history(tree_id).await
    }

    /// Roots inside `range`; `GenerationRange::latest(n)` gives the newest `n`
    pub async fn get_history(&self, tree_id: Bytes32, range: GenerationRange) -> Result<Vec<Root>> {
        self.transaction().await?.get_history(tree_id, range).await
    }

    /// The most recent root with the given hash, `None` hash meaning empty
    pub async fn get_last_tree_root_by_hash(
        &self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Option<Root>> {
        self.transaction()
            .await?
            .get_last_tree_root_by_hash(tree_id, root_hash)
            .await
    }

    /// A node by hash
    pub async fn get_node(&self, node_hash: Bytes32) -> Result<Node> {
        self.transaction().await?.get_node(node_hash).await
    }

    /// The kind of a node
    pub async fn get_node_type(&self, node_hash: Bytes32) -> Result<NodeType> {
        self.transaction().await?.get_node_type(node_hash).await
    }
}

impl DataStore<MemoryBackend> {
    /// A store that keeps everything in memory
    pub fn memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl DataStore<SqliteBackend> {
    /// A store persisted in a SQLite file
    pub async fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(SqliteBackend::open(path).await?))
    }
}

/// An open unit of work holding the store lock
///
/// Reads see committed data overlaid with this transaction's staged writes.
pub struct Transaction<'a, B: StorageBackend> {
    _guard: MutexGuard<'a, ()>,
    backend: &'a B,
    staged_trees: Vec<Bytes32>,
    staged_nodes: HashMap<Bytes32, Node>,
    // Insertion order keeps children ahead of parents in the batch
    node_order: Vec<Bytes32>,
    staged_roots: Vec<Root>,
}

impl<'a, B: StorageBackend> Transaction<'a, B> {
    fn new(guard: MutexGuard<'a, ()>, backend: &'a B) -> Self {
        Self {
            _guard: guard,
            backend,
            staged_trees: Vec::new(),
            staged_nodes: HashMap::new(),
            node_order: Vec::new(),
            staged_roots: Vec::new(),
        }
    }

    /// The backend this transaction writes to
    pub fn backend(&self) -> &B {
        self.backend
    }

    /// Check if anything is waiting to be committed
    pub fn has_staged_writes(&self) -> bool {
        !(self.staged_trees.is_empty() && self.node_order.is_empty() && self.staged_roots.is_empty())
    }

    /// Apply all staged writes atomically and release the lock
    pub async fn commit(mut self) -> Result<()> {
        if !self.has_staged_writes() {
            return Ok(());
        }

        let mut staged_nodes = std::mem::take(&mut self.staged_nodes);
        let nodes = std::mem::take(&mut self.node_order)
            .into_iter()
            .filter_map(|hash| staged_nodes.remove(&hash))
            .collect();
        let batch = WriteBatch {
            trees: std::mem::take(&mut self.staged_trees),
            nodes,
            roots: std::mem::take(&mut self.staged_roots),
        };
        let roots: Vec<Root> = batch.roots.clone();

        self.backend.commit(batch).await?;
        for root in roots {
            info!(
                tree_id = %root.tree_id,
                generation = root.generation,
                root_hash = %Bytes32::from_option(root.node_hash),
                "Root committed"
            );
        }
        Ok(())
    }

    /// Discard all staged writes and release the lock
    pub fn rollback(mut self) {
        if self.has_staged_writes() {
            debug!(
                nodes = self.node_order.len(),
                roots = self.staged_roots.len(),
                "Transaction rolled back"
            );
        }
        self.staged_trees.clear();
        self.staged_nodes.clear();
        self.node_order.clear();
        self.staged_roots.clear();
    }

    // ---- NodeStore ----

    /// A node by hash, if present
    pub async fn find_node(&self, hash: Bytes32) -> Result<Option<Node>> {
        if let Some(node) = self.staged_nodes.get(&hash) {
            return Ok(Some(node.clone()));
        }
        Ok(self.backend.get_node(&hash).await?)
    }

    /// A node by hash
    pub async fn get_node(&self, hash: Bytes32) -> Result<Node> {
        self.find_node(hash)
            .await?
            .ok_or(CoreError::NodeNotFound(hash))
    }

    /// An internal node by hash
    pub(crate) async fn get_internal(&self, hash: Bytes32) -> Result<InternalNode> {
        match self.get_node(hash).await? {
            Node::Internal(node) => Ok(node),
            Node::Terminal(_) => Err(CoreError::Integrity(format!(
                "expected internal node at {hash}"
            ))),
        }
    }

    /// Check if a node exists
    pub async fn has_node(&self, hash: Bytes32) -> Result<bool> {
        if self.staged_nodes.contains_key(&hash) {
            return Ok(true);
        }
        Ok(self.backend.has_node(&hash).await?)
    }

    /// The kind of a node
    pub async fn get_node_type(&self, hash: Bytes32) -> Result<NodeType> {
        Ok(self.get_node(hash).await?.node_type())
    }

    /// Stage a node, verifying its hash and children; no-op if already present
    pub async fn put_node(&mut self, node: Node) -> Result<Bytes32> {
        let hash = node.hash();
        if !node.is_hash_valid() {
            return Err(CoreError::Integrity(format!(
                "node hash {hash} does not match content (expected {})",
                node.computed_hash()
            )));
        }
        check_record_len(&node)?;
        if self.has_node(hash).await? {
            return Ok(hash);
        }
        if let Node::Internal(internal) = &node {
            for child in [internal.left_hash, internal.right_hash] {
                if !self.has_node(child).await? {
                    return Err(CoreError::Integrity(format!(
                        "internal node {hash} references missing child {child}"
                    )));
                }
            }
        }

        self.staged_nodes.insert(hash, node);
        self.node_order.push(hash);
        Ok(hash)
    }

    /// Build a node from raw parts and stage it
    ///
    /// `value1`/`value2` are the child hashes of an internal node or the key and
    /// value of a terminal.
    pub async fn insert_raw(
        &mut self,
        node_type: NodeType,
        value1: &[u8],
        value2: &[u8],
    ) -> Result<Bytes32> {
        let node = match node_type {
            NodeType::Internal => {
                InternalNode::new(Bytes32::from_slice(value1)?, Bytes32::from_slice(value2)?).into()
            }
            NodeType::Terminal => {
                TerminalNode::new(value1.to_vec(), value2.to_vec()).into()
            }
        };
        self.put_node(node).await
    }

    // ---- RootLog ----

    /// Check if a tree is registered
    pub async fn has_tree(&self, tree_id: Bytes32) -> Result<bool> {
        if self.staged_trees.contains(&tree_id) {
            return Ok(true);
        }
        Ok(self.backend.has_tree(&tree_id).await?)
    }

    async fn ensure_tree(&self, tree_id: Bytes32) -> Result<()> {
        if self.has_tree(tree_id).await? {
            Ok(())
        } else {
            Err(CoreError::TreeNotFound(tree_id))
        }
    }

    /// Register a tree with an empty generation-0 root
    pub async fn create_tree(&mut self, tree_id: Bytes32) -> Result<()> {
        if self.has_tree(tree_id).await? {
            return Err(CoreError::TreeAlreadyExists(tree_id));
        }
        self.staged_trees.push(tree_id);
        self.staged_roots.push(Root::empty(tree_id));
        debug!(%tree_id, "Tree staged");
        Ok(())
    }

    /// All registered tree ids
    pub async fn get_tree_ids(&self) -> Result<BTreeSet<Bytes32>> {
        let mut ids = self.backend.tree_ids().await?;
        ids.extend(self.staged_trees.iter().copied());
        Ok(ids)
    }

    /// The latest root of a tree
    pub async fn get_tree_root(&self, tree_id: Bytes32) -> Result<Root> {
        if let Some(root) = self.staged_roots.iter().rev().find(|r| r.tree_id == tree_id) {
            return Ok(*root);
        }
        match self.backend.latest_root(&tree_id).await? {
            Some(root) => Ok(root),
            None if self.backend.has_tree(&tree_id).await? => Err(CoreError::Integrity(format!(
                "tree {tree_id} has no root rows"
            ))),
            None => Err(CoreError::TreeNotFound(tree_id)),
        }
    }

    /// The root at an exact generation
    pub async fn get_tree_root_at(&self, tree_id: Bytes32, generation: u32) -> Result<Root> {
        if let Some(root) = self
            .staged_roots
            .iter()
            .find(|r| r.tree_id == tree_id && r.generation == generation)
        {
            return Ok(*root);
        }
        self.ensure_tree(tree_id).await?;
        self.backend
            .root_at(&tree_id, generation)
            .await?
            .ok_or(CoreError::GenerationNotFound {
                tree_id,
                generation,
            })
    }

    /// The latest generation of a tree
    pub async fn get_tree_generation(&self, tree_id: Bytes32) -> Result<u32> {
        Ok(self.get_tree_root(tree_id).await?.generation)
    }

    /// Check if the latest root of a tree is empty
    pub async fn table_is_empty(&self, tree_id: Bytes32) -> Result<bool> {
        Ok(self.get_tree_root(tree_id).await?.is_empty())
    }

    /// Roots inside `range`, in the range's order, truncated to its limit
    pub async fn get_history(&self, tree_id: Bytes32, range: GenerationRange) -> Result<Vec<Root>> {
        self.ensure_tree(tree_id).await?;
        let unbounded = GenerationRange {
            limit: None,
            order: HistoryOrder::Ascending,
            ..range
        };
        let mut roots = self.backend.roots(&tree_id, unbounded).await?;
        // Staged roots always follow the committed ones
        roots.extend(
            self.staged_roots
                .iter()
                .filter(|r| r.tree_id == tree_id && range.contains(r.generation))
                .copied(),
        );
        if range.order == HistoryOrder::Descending {
            roots.reverse();
        }
        if let Some(limit) = range.limit {
            roots.truncate(limit);
        }
        Ok(roots)
    }

    /// Every root of a tree, most recent first
    pub async fn get_roots_history(&self, tree_id: Bytes32) -> Result<Vec<Root>> {
        self.get_history(tree_id, GenerationRange::all().descending())
            .await
    }

    /// The most recent root with the given hash, `None` hash meaning empty
    pub async fn get_last_tree_root_by_hash(
        &self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Option<Root>> {
        Ok(self
            .get_roots_history(tree_id)
            .await?
            .into_iter()
            .find(|root| root.node_hash == root_hash))
    }

    /// Resolve an optional historical root hash, defaulting to the latest root
    pub(crate) async fn resolve_root(
        &self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<Option<Bytes32>> {
        match root_hash {
            None => Ok(self.get_tree_root(tree_id).await?.node_hash),
            Some(hash) => match self.get_last_tree_root_by_hash(tree_id, Some(hash)).await? {
                Some(root) => Ok(root.node_hash),
                None => Err(CoreError::RootNotFound {
                    tree_id,
                    root_hash: hash,
                }),
            },
        }
    }

    /// Append the next generation's root
    #[instrument(skip(self))]
    pub async fn append_root(&mut self, tree_id: Bytes32, node_hash: Option<Bytes32>) -> Result<Root> {
        let current = self.get_tree_root(tree_id).await?;
        if let Some(hash) = node_hash {
            if !self.has_node(hash).await? {
                return Err(CoreError::Integrity(format!(
                    "root {hash} for tree {tree_id} does not resolve to a node"
                )));
            }
        }
        let generation = current.generation.checked_add(1).ok_or_else(|| {
            CoreError::Integrity(format!("generation overflow for tree {tree_id}"))
        })?;
        let root = Root::new(tree_id, node_hash, generation);
        self.staged_roots.push(root);
        Ok(root)
    }
}

impl<B: StorageBackend> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        if self.has_staged_writes() {
            warn!(
                nodes = self.node_order.len(),
                roots = self.staged_roots.len(),
                "Transaction dropped without commit, discarding staged writes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::time::Duration;

    fn tree_id() -> Bytes32 {
        Bytes32::new([7; 32])
    }

    #[tokio::test]
    async fn test_create_tree_writes_generation_zero() {
        let store = DataStore::memory();
        store.create_tree(tree_id()).await.unwrap();

        let root = store.get_tree_root(tree_id()).await.unwrap();
        assert_eq!(root, Root::empty(tree_id()));
        assert!(store.table_is_empty(tree_id()).await.unwrap());
        assert_eq!(store.get_tree_ids().await.unwrap().len(), 1);

        let err = store.create_tree(tree_id()).await.unwrap_err();
        assert!(matches!(err, CoreError::TreeAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_unknown_tree() {
        let store = DataStore::memory();
        let err = store.get_tree_root(tree_id()).await.unwrap_err();
        assert!(matches!(err, CoreError::TreeNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_put_node_rejects_bad_hash_and_missing_children() {
        let store = DataStore::memory();
        let mut tx = store.transaction().await.unwrap();

        let mut forged = TerminalNode::new(&b"k"[..], &b"v"[..]);
        forged.hash = Bytes32::new([1; 32]);
        let err = tx.put_node(forged.into()).await.unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));

        let orphan = InternalNode::new(Bytes32::new([2; 32]), Bytes32::new([3; 32]));
        let err = tx.put_node(orphan.into()).await.unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));
        assert!(!tx.has_staged_writes());
    }

    #[tokio::test]
    async fn test_put_node_is_idempotent() {
        let store = DataStore::memory();
        let mut tx = store.transaction().await.unwrap();
        let node: Node = TerminalNode::new(&b"k"[..], &b"v"[..]).into();

        let first = tx.put_node(node.clone()).await.unwrap();
        let second = tx.put_node(node).await.unwrap();
        assert_eq!(first, second);
        tx.commit().await.unwrap();

        assert_eq!(store.backend().node_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_raw_builds_nodes() {
        let store = DataStore::memory();
        let mut tx = store.transaction().await.unwrap();

        let a = tx.insert_raw(NodeType::Terminal, b"a", &[0, 1]).await.unwrap();
        let b = tx.insert_raw(NodeType::Terminal, b"b", &[3, 5]).await.unwrap();
        let top = tx
            .insert_raw(NodeType::Internal, a.as_bytes(), b.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            top.to_hex(),
            "9796d15db451faa731e49d945ffcbac3f0c2ad6cce1e812ff1e7304ec23537d3"
        );

        let err = tx.insert_raw(NodeType::Internal, b"short", b"").await.unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = DataStore::memory();
        {
            let mut tx = store.transaction().await.unwrap();
            tx.create_tree(tree_id()).await.unwrap();
            tx.put_node(TerminalNode::new(&b"k"[..], &b"v"[..]).into())
                .await
                .unwrap();
        }
        assert!(store.get_tree_ids().await.unwrap().is_empty());
        assert!(store.backend().is_empty());
    }

    #[tokio::test]
    async fn test_append_root_requires_resolvable_hash() {
        let store = DataStore::memory();
        store.create_tree(tree_id()).await.unwrap();

        let mut tx = store.transaction().await.unwrap();
        let err = tx
            .append_root(tree_id(), Some(Bytes32::new([9; 32])))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));

        let hash = tx
            .put_node(TerminalNode::new(&b"k"[..], &b"v"[..]).into())
            .await
            .unwrap();
        let root = tx.append_root(tree_id(), Some(hash)).await.unwrap();
        assert_eq!(root.generation, 1);
        // Staged roots are visible inside the transaction
        assert_eq!(tx.get_tree_generation(tree_id()).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let history = store.get_roots_history(tree_id()).await.unwrap();
        assert_eq!(
            history.iter().map(|r| r.generation).collect::<Vec<_>>(),
            vec![1, 0]
        );
        assert_eq!(
            store
                .get_last_tree_root_by_hash(tree_id(), Some(hash))
                .await
                .unwrap()
                .map(|r| r.generation),
            Some(1)
        );
        assert!(matches!(
            store.get_tree_root_at(tree_id(), 5).await,
            Err(CoreError::GenerationNotFound { generation: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_history_order_and_limit() {
        let store = DataStore::memory();
        crate::testing::add_01234567_example(&store).await;
        let id = crate::testing::tree_id();
        let generations = |roots: Vec<Root>| roots.iter().map(|r| r.generation).collect::<Vec<_>>();

        let oldest = store
            .get_history(id, GenerationRange::all().with_limit(2))
            .await
            .unwrap();
        assert_eq!(generations(oldest), vec![0, 1]);

        let latest = store.get_history(id, GenerationRange::latest(2)).await.unwrap();
        assert_eq!(generations(latest), vec![8, 7]);

        let window = store
            .get_history(id, GenerationRange::between(2, 5).descending().with_limit(3))
            .await
            .unwrap();
        assert_eq!(generations(window), vec![5, 4, 3]);

        let all = store.get_roots_history(id).await.unwrap();
        assert_eq!(generations(all), (0..=8).rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_latest_history_includes_staged_roots() {
        let store = DataStore::memory();
        store.create_tree(tree_id()).await.unwrap();

        let mut tx = store.transaction().await.unwrap();
        let hash = tx
            .put_node(TerminalNode::new(&b"k"[..], &b"v"[..]).into())
            .await
            .unwrap();
        tx.append_root(tree_id(), Some(hash)).await.unwrap();

        let latest = tx
            .get_history(tree_id(), GenerationRange::latest(1))
            .await
            .unwrap();
        assert_eq!(latest, vec![Root::new(tree_id(), Some(hash), 1)]);
        tx.rollback();
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let store = DataStore::with_config(
            MemoryBackend::new(),
            DataStoreConfig::default().with_lock_timeout(Duration::from_millis(20)),
        );
        let _held = store.transaction().await.unwrap();

        let err = store.get_tree_ids().await.unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout(_)));
        assert_eq!(err.kind(), ErrorKind::Concurrency);
    }

    #[tokio::test]
    async fn test_sqlite_backend_commits_atomically() {
        let store = DataStore::new(SqliteBackend::in_memory().await.unwrap());
        store.create_tree(tree_id()).await.unwrap();

        let mut tx = store.transaction().await.unwrap();
        let hash = tx
            .put_node(TerminalNode::new(&b"k"[..], &b"v"[..]).into())
            .await
            .unwrap();
        tx.append_root(tree_id(), Some(hash)).await.unwrap();
        tx.rollback();

        assert_eq!(store.get_tree_generation(tree_id()).await.unwrap(), 0);
        assert_eq!(store.backend().node_count().await.unwrap(), 0);
    }
}
