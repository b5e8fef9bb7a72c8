//! Application state

use crate::config::DataLayerConfig;
use datalayer_client::DataLayerClient;
use datalayer_core::DataStore;
use datalayer_store::{FlexibleBackend, MemoryBackend};
use tracing::{info, warn};

/// Store and mirror client shared by every command
pub struct AppState {
    pub config: DataLayerConfig,
    pub store: DataStore<FlexibleBackend>,
    pub client: DataLayerClient,
}

impl AppState {
    /// Open the configured backend
    pub async fn new(config: DataLayerConfig) -> anyhow::Result<Self> {
        let backend = if config.use_memory_store {
            info!("Using in-memory store (data will not persist)");
            FlexibleBackend::Memory(MemoryBackend::new())
        } else {
            FlexibleBackend::sqlite_or_memory(&config.database).await
        };

        if backend.is_persistent() {
            info!(path = ?config.database.path, "Storage mode: SQLite (persistent)");
        } else {
            warn!("Storage mode: in-memory (NOT persistent)");
        }

        let store = DataStore::with_config(backend, config.datastore_config());
        let client = DataLayerClient::new(config.client_config())?;
        Ok(Self {
            config,
            store,
            client,
        })
    }

    /// State over a fresh in-memory store
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::new(DataLayerConfig {
            use_memory_store: true,
            ..Default::default()
        })
        .await
    }
}
