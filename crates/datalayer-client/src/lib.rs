//! # Data Layer Client
//!
//! Subscriber side of the Data Layer: follows a tree's anchored roots by
//! downloading delta files from HTTP mirrors.
//!
//! ## Features
//!
//! - **HTTP delta source**: [`HttpDeltaSource`] with retries on server errors
//! - **Subscriptions**: Mirrors tried in order, resuming after partial progress
//! - **Verification**: The local root must equal the newest anchored root
//!
//! ## Example
//!
//! ```rust,ignore
//! use datalayer_client::{Config, DataLayerClient, Subscription};
//! use datalayer_core::DataStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = DataStore::open_sqlite("datalayer.sqlite").await?;
//!     let client = DataLayerClient::new(Config::default())?;
//!
//!     let subscription = Subscription::new(tree_id).with_url("http://mirror:8575");
//!     let report = client.sync_subscription(&store, &subscription, &records).await?;
//!     println!("now at generation {}", report.to_generation);
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod http;
mod subscription;
mod sync;

pub use config::{Config, DEFAULT_MAX_FILE_SIZE};
pub use error::{ClientError, Result};
pub use http::HttpDeltaSource;
pub use subscription::{SingletonRecord, Subscription};
pub use sync::{DataLayerClient, SyncReport};
