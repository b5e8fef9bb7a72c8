//! Following a subscription up to its anchored root

use crate::{ClientError, Config, HttpDeltaSource, Result, SingletonRecord, Subscription};
use datalayer_core::DataStore;
use datalayer_crypto::Bytes32;
use datalayer_store::{Root, StorageBackend};
use reqwest::Client;
use tracing::{info, instrument, warn};

/// Outcome of one sync pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub tree_id: Bytes32,
    pub from_generation: u32,
    pub to_generation: u32,
    /// Mirror that served the last applied file, if anything was fetched
    pub mirror: Option<String>,
}

impl SyncReport {
    /// Check if the tree was already current
    pub fn is_noop(&self) -> bool {
        self.from_generation == self.to_generation
    }
}

/// Downloads delta files from mirrors into a local store
pub struct DataLayerClient {
    config: Config,
    http: Client,
}

impl DataLayerClient {
    /// Create a new client with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ClientError::Http)?;
        Ok(Self { config, http })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A delta source for one mirror, sharing this client's connection pool
    pub fn source(&self, url: &str) -> HttpDeltaSource {
        HttpDeltaSource::with_client(url, self.http.clone(), self.config.max_retries)
            .with_max_file_size(self.config.max_file_size)
    }

    /// Bring a subscribed tree up to the newest confirmed anchored root
    ///
    /// `records` are the singleton's states; only confirmed ones past the local
    /// generation are followed and they must be contiguous. Mirrors are tried in
    /// order, each resuming where the previous one stopped.
    #[instrument(skip(self, store, subscription, records), fields(tree_id = %subscription.tree_id))]
    pub async fn sync_subscription<B: StorageBackend>(
        &self,
        store: &DataStore<B>,
        subscription: &Subscription,
        records: &[SingletonRecord],
    ) -> Result<SyncReport> {
        let tree_id = subscription.tree_id;
        if !store.get_tree_ids().await?.contains(&tree_id) {
            store.create_tree(tree_id).await?;
            info!(%tree_id, "Created local tree for subscription");
        }

        let from_generation = store.get_tree_generation(tree_id).await?;
        let pending = pending_roots(records, from_generation)?;
        let Some(&target) = pending.last() else {
            return Ok(SyncReport {
                tree_id,
                from_generation,
                to_generation: from_generation,
                mirror: None,
            });
        };

        let options = self.config.replication_options();
        let mut mirror = None;
        for url in &subscription.urls {
            let generation = store.get_tree_generation(tree_id).await?;
            let done = (generation - from_generation) as usize;
            let source = self.source(url);
            match store
                .apply_delta(tree_id, generation, &pending[done..], &source, &options)
                .await
            {
                Ok(_) => {
                    mirror = Some(url.clone());
                    break;
                }
                Err(err) => {
                    let err = ClientError::from(err);
                    if !err.is_transport() {
                        return Err(err);
                    }
                    warn!(%url, error = %err, "Mirror failed, trying next");
                }
            }
        }

        let root = store.get_tree_root(tree_id).await?;
        if mirror.is_none() {
            return Err(ClientError::NoReachableMirror {
                tree_id,
                tried: subscription.urls.len(),
            });
        }
        verify_root(&root, target)?;

        info!(
            from = from_generation,
            to = root.generation,
            "Subscription synced"
        );
        Ok(SyncReport {
            tree_id,
            from_generation,
            to_generation: root.generation,
            mirror,
        })
    }
}

/// Anchored roots for generations `after + 1 ..`, in order
fn pending_roots(records: &[SingletonRecord], after: u32) -> Result<Vec<Option<Bytes32>>> {
    let mut confirmed: Vec<&SingletonRecord> = records
        .iter()
        .filter(|record| record.confirmed && record.generation > after)
        .collect();
    confirmed.sort_by_key(|record| record.generation);

    let mut expected = after + 1;
    let mut roots = Vec::with_capacity(confirmed.len());
    for record in confirmed {
        if record.generation != expected {
            return Err(ClientError::InvalidHistory(format!(
                "expected generation {expected}, found {}",
                record.generation
            )));
        }
        roots.push(record.root_hash());
        expected += 1;
    }
    Ok(roots)
}

fn verify_root(root: &Root, expected: Option<Bytes32>) -> Result<()> {
    if root.node_hash != expected {
        return Err(ClientError::RootMismatch {
            tree_id: root.tree_id,
            expected,
            actual: root.node_hash,
        });
    }
    Ok(())
}
