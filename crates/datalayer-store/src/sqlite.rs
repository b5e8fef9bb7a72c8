//! SQLite backend
//!
//! Schema:
//! ```sql
//! CREATE TABLE tree (id BLOB PRIMARY KEY);
//! CREATE TABLE node (
//!   hash BLOB PRIMARY KEY,
//!   node_type INTEGER NOT NULL,   -- 1 internal, 2 terminal
//!   left BLOB REFERENCES node,
//!   right BLOB REFERENCES node,
//!   key BLOB,
//!   value BLOB
//! );
//! CREATE TABLE root (
//!   tree_id BLOB NOT NULL REFERENCES tree,
//!   generation INTEGER NOT NULL,
//!   node_hash BLOB REFERENCES node,  -- NULL for an empty tree
//!   PRIMARY KEY (tree_id, generation)
//! );
//! ```

use crate::{
    GenerationRange, HistoryOrder, InternalNode, Node, NodeType, Result, Root, StorageBackend,
    StoreError, TerminalNode, WriteBatch,
};
use async_trait::async_trait;
use bytes::Bytes;
use datalayer_crypto::Bytes32;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS tree (id BLOB PRIMARY KEY)",
    r#"
    CREATE TABLE IF NOT EXISTS node (
        hash BLOB PRIMARY KEY,
        node_type INTEGER NOT NULL CHECK (node_type IN (1, 2)),
        left BLOB REFERENCES node,
        right BLOB REFERENCES node,
        key BLOB,
        value BLOB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS root (
        tree_id BLOB NOT NULL REFERENCES tree,
        generation INTEGER NOT NULL CHECK (generation >= 0),
        node_hash BLOB REFERENCES node,
        PRIMARY KEY (tree_id, generation)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS node_hash_index ON root (node_hash)",
];

/// SQLite backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file, `None` for a private in-memory database
    pub path: Option<PathBuf>,
    /// Pool size for file databases
    pub max_connections: u32,
    /// How long a connection waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

impl SqliteConfig {
    /// Config for a database file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Set the pool size
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the busy timeout
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// A backend persisting nodes and roots in SQLite
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    file_backed: bool,
}

impl SqliteBackend {
    /// Open a backend from config, creating the schema if needed
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let pool = match &config.path {
            Some(path) => {
                if config.max_connections == 0 {
                    return Err(StoreError::Configuration(
                        "max_connections must be at least 1".to_string(),
                    ));
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(busy_timeout);
                SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect_with(options)
                    .await?
            }
            None => {
                // Every connection to ":memory:" is a separate database, so the
                // pool must hold exactly one connection forever.
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?
                    .foreign_keys(true)
                    .busy_timeout(busy_timeout);
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?
            }
        };

        let backend = Self {
            pool,
            file_backed: config.path.is_some(),
        };
        backend.init_schema().await?;
        info!(path = ?config.path, "SQLite backend ready");
        Ok(backend)
    }

    /// Open or create a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect(&SqliteConfig::file(path.as_ref())).await
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&SqliteConfig::default()).await
    }

    /// Check if the database lives in a file
    pub fn is_file_backed(&self) -> bool {
        self.file_backed
    }

    /// The underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn insert_node(tx: &mut Transaction<'_, Sqlite>, node: &Node) -> Result<()> {
        let hash = node.hash();
        let query = match node {
            Node::Internal(internal) => sqlx::query(
                "INSERT OR IGNORE INTO node (hash, node_type, left, right) VALUES (?, ?, ?, ?)",
            )
            .bind(hash.as_bytes().to_vec())
            .bind(NodeType::Internal.code())
            .bind(internal.left_hash.as_bytes().to_vec())
            .bind(internal.right_hash.as_bytes().to_vec()),
            Node::Terminal(terminal) => sqlx::query(
                "INSERT OR IGNORE INTO node (hash, node_type, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(hash.as_bytes().to_vec())
            .bind(NodeType::Terminal.code())
            .bind(terminal.key.to_vec())
            .bind(terminal.value.to_vec()),
        };
        query.execute(&mut **tx).await?;
        Ok(())
    }

    async fn insert_tree(tx: &mut Transaction<'_, Sqlite>, tree_id: &Bytes32) -> Result<()> {
        let exists = sqlx::query("SELECT 1 FROM tree WHERE id = ?")
            .bind(tree_id.as_bytes().to_vec())
            .fetch_optional(&mut **tx)
            .await?
            .is_some();
        if exists {
            return Err(StoreError::TreeAlreadyExists(*tree_id));
        }
        sqlx::query("INSERT INTO tree (id) VALUES (?)")
            .bind(tree_id.as_bytes().to_vec())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_root(tx: &mut Transaction<'_, Sqlite>, root: &Root) -> Result<()> {
        let tree_known = sqlx::query("SELECT 1 FROM tree WHERE id = ?")
            .bind(root.tree_id.as_bytes().to_vec())
            .fetch_optional(&mut **tx)
            .await?
            .is_some();
        if !tree_known {
            return Err(StoreError::TreeNotFound(root.tree_id));
        }

        let taken = sqlx::query("SELECT 1 FROM root WHERE tree_id = ? AND generation = ?")
            .bind(root.tree_id.as_bytes().to_vec())
            .bind(i64::from(root.generation))
            .fetch_optional(&mut **tx)
            .await?
            .is_some();
        if taken {
            return Err(StoreError::RootConflict {
                tree_id: root.tree_id,
                generation: root.generation,
            });
        }

        sqlx::query("INSERT INTO root (tree_id, generation, node_hash) VALUES (?, ?, ?)")
            .bind(root.tree_id.as_bytes().to_vec())
            .bind(i64::from(root.generation))
            .bind(root.node_hash.map(|hash| hash.as_bytes().to_vec()))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

fn hash_column(row: &SqliteRow, column: &str) -> Result<Bytes32> {
    let raw: Vec<u8> = row.try_get(column)?;
    Ok(Bytes32::from_slice(&raw)?)
}

fn required_hash(row: &SqliteRow, column: &str) -> Result<Bytes32> {
    let raw: Option<Vec<u8>> = row.try_get(column)?;
    let raw = raw.ok_or_else(|| StoreError::Integrity(format!("internal node missing {column}")))?;
    Ok(Bytes32::from_slice(&raw)?)
}

fn node_from_row(row: &SqliteRow) -> Result<Node> {
    let hash = hash_column(row, "hash")?;
    let code: i64 = row.try_get("node_type")?;
    match NodeType::from_code(code) {
        Some(NodeType::Internal) => Ok(Node::Internal(InternalNode {
            hash,
            left_hash: required_hash(row, "left")?,
            right_hash: required_hash(row, "right")?,
        })),
        Some(NodeType::Terminal) => {
            let key: Option<Vec<u8>> = row.try_get("key")?;
            let value: Option<Vec<u8>> = row.try_get("value")?;
            Ok(Node::Terminal(TerminalNode {
                hash,
                key: Bytes::from(key.unwrap_or_default()),
                value: Bytes::from(value.unwrap_or_default()),
            }))
        }
        None => Err(StoreError::Integrity(format!(
            "node {hash} has unknown node_type {code}"
        ))),
    }
}

fn root_from_row(row: &SqliteRow) -> Result<Root> {
    let tree_id = hash_column(row, "tree_id")?;
    let generation: i64 = row.try_get("generation")?;
    let generation = u32::try_from(generation)
        .map_err(|_| StoreError::Integrity(format!("generation {generation} out of range")))?;
    let node_hash: Option<Vec<u8>> = row.try_get("node_hash")?;
    let node_hash = node_hash
        .map(|raw| Bytes32::from_slice(&raw))
        .transpose()?;
    Ok(Root::new(tree_id, node_hash, generation))
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get_node(&self, hash: &Bytes32) -> Result<Option<Node>> {
        let row = sqlx::query("SELECT * FROM node WHERE hash = ?")
            .bind(hash.as_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn has_node(&self, hash: &Bytes32) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM node WHERE hash = ?")
            .bind(hash.as_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn all_nodes(&self) -> Result<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM node")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn node_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM node")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }

    async fn tree_ids(&self) -> Result<BTreeSet<Bytes32>> {
        let rows = sqlx::query("SELECT id FROM tree")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| hash_column(row, "id")).collect()
    }

    async fn has_tree(&self, tree_id: &Bytes32) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM tree WHERE id = ?")
            .bind(tree_id.as_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn latest_root(&self, tree_id: &Bytes32) -> Result<Option<Root>> {
        let row = sqlx::query(
            "SELECT * FROM root WHERE tree_id = ? ORDER BY generation DESC LIMIT 1",
        )
        .bind(tree_id.as_bytes().to_vec())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(root_from_row).transpose()
    }

    async fn root_at(&self, tree_id: &Bytes32, generation: u32) -> Result<Option<Root>> {
        let row = sqlx::query("SELECT * FROM root WHERE tree_id = ? AND generation = ?")
            .bind(tree_id.as_bytes().to_vec())
            .bind(i64::from(generation))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(root_from_row).transpose()
    }

    async fn roots(&self, tree_id: &Bytes32, range: GenerationRange) -> Result<Vec<Root>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = range
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let sql = match range.order {
            HistoryOrder::Ascending => {
                "SELECT * FROM root WHERE tree_id = ? AND generation >= ? AND generation <= ? \
                 ORDER BY generation ASC LIMIT ?"
            }
            HistoryOrder::Descending => {
                "SELECT * FROM root WHERE tree_id = ? AND generation >= ? AND generation <= ? \
                 ORDER BY generation DESC LIMIT ?"
            }
        };
        let rows = sqlx::query(sql)
        .bind(tree_id.as_bytes().to_vec())
        .bind(i64::from(range.min.unwrap_or(0)))
        .bind(i64::from(range.max.unwrap_or(u32::MAX)))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(root_from_row).collect()
    }

    #[instrument(skip(self, batch), fields(trees = batch.trees.len(), nodes = batch.nodes.len(), roots = batch.roots.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for tree_id in &batch.trees {
            Self::insert_tree(&mut tx, tree_id).await?;
        }
        for node in &batch.nodes {
            Self::insert_node(&mut tx, node).await?;
        }
        for root in &batch.roots {
            Self::insert_root(&mut tx, root).await?;
        }
        tx.commit().await?;

        debug!("Batch committed");
        Ok(())
    }
}
