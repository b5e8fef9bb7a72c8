//! Where delta files come from

use super::{ReplicationError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

/// A place delta files can be fetched from by name
#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Fetch a file; failures are reported as `Transport`
    async fn fetch(&self, filename: &str) -> Result<Bytes>;
}

/// Files in a local directory
#[derive(Clone, Debug)]
pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DeltaSource for LocalDirSource {
    async fn fetch(&self, filename: &str) -> Result<Bytes> {
        let path = self.root.join(filename);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| ReplicationError::Transport {
                filename: filename.to_string(),
                message: format!("{}: {e}", path.display()),
            })
    }
}
