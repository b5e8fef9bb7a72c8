//! # Data Layer CLI
//!
//! Operator commands for a local Data Layer store.
//!
//! This crate provides:
//! - **Configuration**: TOML file plus `DATALAYER__*` environment variables
//! - **State**: SQLite store with an in-memory fallback, and a mirror client
//! - **Commands**: Tree edits, reads, proofs, diffs and snapshot file transfer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        datalayer (clap commands)        │
//! ├─────────────────────────────────────────┤
//! │  AppState: DataStore + DataLayerClient  │
//! ├────────────────────┬────────────────────┤
//! │   datalayer-core   │  datalayer-client  │
//! ├────────────────────┴────────────────────┤
//! │    datalayer-store (SQLite / memory)    │
//! └─────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod state;

pub use commands::{run, Command};
pub use config::{DataLayerConfig, MirrorConfig};
pub use state::AppState;
