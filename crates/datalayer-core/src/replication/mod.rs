//! Snapshot replication between stores
//!
//! A publisher writes, for every generation, a full file and a delta file
//! holding only the nodes that generation introduced. A subscriber that is at
//! generation `n` fetches the delta files for `n + 1, n + 2, ...` by name and
//! applies each one as its own transaction.
//!
//! ```text
//! publisher                          subscriber
//!   write_files_for_root ──► folder / HTTP mirror ──► DeltaSource::fetch
//!                                                      apply_delta
//! ```

pub mod codec;
pub mod files;
pub mod source;

pub use codec::{
    check_record_len, decode_records, encode_records, record_len, SerializedNode, MAX_RECORD_SIZE,
};
pub use files::{delta_filename, full_filename};
pub use source::{DeltaSource, LocalDirSource};

use crate::{CoreError, DataStore};
use bytes::Bytes;
use datalayer_crypto::Bytes32;
use datalayer_store::{Root, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Result type alias using `ReplicationError`
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors raised while exporting or applying snapshot files
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Store rejected the data
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A file could not be fetched
    #[error("failed to fetch {filename}: {message}")]
    Transport { filename: String, message: String },

    /// A record stream is malformed
    #[error("malformed record stream: {0}")]
    Codec(String),

    /// Local file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to do when a delta file cannot be fetched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Any fetch failure aborts
    #[default]
    Strict,
    /// Treat the file as empty if the root hash is already in local history
    TolerateKnownRoots,
}

/// Options for applying deltas
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationOptions {
    pub gap_policy: GapPolicy,
    /// Keep a copy of every fetched file here
    pub cache_folder: Option<PathBuf>,
}

impl ReplicationOptions {
    /// Set the gap policy
    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }

    /// Cache fetched files in a folder
    pub fn with_cache_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.cache_folder = Some(folder.into());
        self
    }
}

impl<B: StorageBackend> DataStore<B> {
    async fn fetch_delta<S: DeltaSource + ?Sized>(
        &self,
        tree_id: Bytes32,
        root_hash: Option<Bytes32>,
        filename: &str,
        source: &S,
        options: &ReplicationOptions,
    ) -> Result<Bytes> {
        let err = match source.fetch(filename).await {
            Ok(data) => return Ok(data),
            Err(err) => err,
        };
        let tolerable = matches!(err, ReplicationError::Transport { .. })
            && options.gap_policy == GapPolicy::TolerateKnownRoots
            && self
                .get_last_tree_root_by_hash(tree_id, root_hash)
                .await?
                .is_some();
        if !tolerable {
            return Err(err);
        }

        warn!(
            %filename,
            error = %err,
            "Delta file unavailable for a root already in history, using an empty delta"
        );
        Ok(Bytes::new())
    }

    /// Fetch and apply the delta files for `root_hashes`, one generation each
    ///
    /// The tree must currently be at `existing_generation`. Each generation is
    /// committed on its own, so a failure part way leaves the earlier
    /// generations applied.
    #[instrument(skip(self, root_hashes, source, options), fields(roots = root_hashes.len()))]
    pub async fn apply_delta<S: DeltaSource + ?Sized>(
        &self,
        tree_id: Bytes32,
        existing_generation: u32,
        root_hashes: &[Option<Bytes32>],
        source: &S,
        options: &ReplicationOptions,
    ) -> Result<Vec<Root>> {
        let actual = self.get_tree_generation(tree_id).await?;
        if actual != existing_generation {
            return Err(CoreError::GenerationMismatch {
                tree_id,
                expected: existing_generation,
                actual,
            }
            .into());
        }
        if let Some(folder) = &options.cache_folder {
            tokio::fs::create_dir_all(folder).await?;
        }

        let mut applied = Vec::with_capacity(root_hashes.len());
        let mut generation = existing_generation;
        for root_hash in root_hashes {
            generation += 1;
            let filename = delta_filename(&tree_id, *root_hash, generation);
            let data = self
                .fetch_delta(tree_id, *root_hash, &filename, source, options)
                .await?;
            if let Some(folder) = &options.cache_folder {
                tokio::fs::write(folder.join(&filename), &data).await?;
            }

            let mut tx = self.transaction().await?;
            let current = tx.get_tree_generation(tree_id).await?;
            if current + 1 != generation {
                return Err(CoreError::GenerationMismatch {
                    tree_id,
                    expected: generation - 1,
                    actual: current,
                }
                .into());
            }
            let root = tx.apply_records(tree_id, *root_hash, data).await?;
            tx.commit().await?;

            info!(%filename, generation = root.generation, "Delta applied");
            applied.push(root);
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{add_01234567_example, tree_id};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves exported deltas from memory, optionally hiding some
    struct MapSource {
        files: HashMap<String, Bytes>,
    }

    #[async_trait]
    impl DeltaSource for MapSource {
        async fn fetch(&self, filename: &str) -> Result<Bytes> {
            self.files
                .get(filename)
                .cloned()
                .ok_or_else(|| ReplicationError::Transport {
                    filename: filename.to_string(),
                    message: "not found".to_string(),
                })
        }
    }

    async fn publish<B: StorageBackend>(store: &DataStore<B>) -> (Vec<Option<Bytes32>>, MapSource) {
        let history = store.get_history(tree_id(), Default::default()).await.unwrap();
        let mut files = HashMap::new();
        let mut hashes = Vec::new();
        for root in history.iter().skip(1) {
            let delta = store.export_delta(tree_id(), root.generation).await.unwrap();
            files.insert(delta_filename(&tree_id(), root.node_hash, root.generation), delta);
            hashes.push(root.node_hash);
        }
        (hashes, MapSource { files })
    }

    #[test_log::test(tokio::test)]
    async fn test_deltas_reproduce_history() {
        let publisher = DataStore::memory();
        add_01234567_example(&publisher).await;
        publisher.delete(tree_id(), &[0x03]).await.unwrap();
        let (hashes, source) = publish(&publisher).await;

        let subscriber = DataStore::memory();
        subscriber.create_tree(tree_id()).await.unwrap();
        let applied = subscriber
            .apply_delta(tree_id(), 0, &hashes, &source, &ReplicationOptions::default())
            .await
            .unwrap();

        assert_eq!(applied.len(), 9);
        assert_eq!(
            publisher.get_roots_history(tree_id()).await.unwrap(),
            subscriber.get_roots_history(tree_id()).await.unwrap()
        );
        subscriber.check_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn test_generation_mismatch() {
        let store = DataStore::memory();
        store.create_tree(tree_id()).await.unwrap();
        let source = MapSource {
            files: HashMap::new(),
        };

        let err = store
            .apply_delta(tree_id(), 3, &[None], &source, &ReplicationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::Core(CoreError::GenerationMismatch {
                expected: 3,
                actual: 0,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal_by_default() {
        let publisher = DataStore::memory();
        add_01234567_example(&publisher).await;
        let (hashes, mut source) = publish(&publisher).await;
        let missing = delta_filename(&tree_id(), hashes[2], 3);
        source.files.remove(&missing);

        let subscriber = DataStore::memory();
        subscriber.create_tree(tree_id()).await.unwrap();
        let err = subscriber
            .apply_delta(tree_id(), 0, &hashes, &source, &ReplicationOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ReplicationError::Transport { ref filename, .. } if *filename == missing));
        // Generations before the gap stay applied
        assert_eq!(subscriber.get_tree_generation(tree_id()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_gap_tolerated_for_known_root() {
        let publisher = DataStore::memory();
        publisher.create_tree(tree_id()).await.unwrap();
        publisher
            .insert(tree_id(), &b"a"[..], &b"1"[..], None, None)
            .await
            .unwrap();
        publisher.delete(tree_id(), b"a").await.unwrap();
        let (mut hashes, source) = publish(&publisher).await;
        let first = hashes[0];

        let subscriber = DataStore::memory();
        subscriber.create_tree(tree_id()).await.unwrap();
        subscriber
            .apply_delta(tree_id(), 0, &hashes, &source, &ReplicationOptions::default())
            .await
            .unwrap();

        // The root of generation 1 shows up again without a published delta
        hashes = vec![first];
        let dir = TempDir::new().unwrap();
        let options = ReplicationOptions::default()
            .with_gap_policy(GapPolicy::TolerateKnownRoots)
            .with_cache_folder(dir.path());
        let strict = subscriber
            .apply_delta(tree_id(), 2, &hashes, &source, &ReplicationOptions::default())
            .await;
        assert!(matches!(strict, Err(ReplicationError::Transport { .. })));

        let applied = subscriber
            .apply_delta(tree_id(), 2, &hashes, &source, &options)
            .await
            .unwrap();
        assert_eq!(applied[0].generation, 3);
        assert_eq!(applied[0].node_hash, first);

        let cached = dir.path().join(delta_filename(&tree_id(), first, 3));
        assert!(tokio::fs::read(cached).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_dir_source() {
        let dir = TempDir::new().unwrap();
        let publisher = DataStore::memory();
        add_01234567_example(&publisher).await;
        let mut hashes = Vec::new();
        for generation in 1..=8 {
            publisher
                .write_files_for_root(tree_id(), generation, dir.path())
                .await
                .unwrap();
            hashes.push(
                publisher
                    .get_tree_root_at(tree_id(), generation)
                    .await
                    .unwrap()
                    .node_hash,
            );
        }

        let subscriber = DataStore::memory();
        subscriber.create_tree(tree_id()).await.unwrap();
        subscriber
            .apply_delta(
                tree_id(),
                0,
                &hashes,
                &LocalDirSource::new(dir.path()),
                &ReplicationOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            publisher.get_tree_root(tree_id()).await.unwrap(),
            subscriber.get_tree_root(tree_id()).await.unwrap()
        );
    }
}
