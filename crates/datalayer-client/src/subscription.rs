//! Subscriptions and anchored root records

use datalayer_crypto::Bytes32;
use serde::{Deserialize, Serialize};

/// A tree followed from one or more HTTP mirrors
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub tree_id: Bytes32,
    /// Mirror base URLs, tried in order
    pub urls: Vec<String>,
}

impl Subscription {
    pub fn new(tree_id: Bytes32) -> Self {
        Self {
            tree_id,
            urls: Vec::new(),
        }
    }

    /// Add a mirror
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }
}

/// One on-chain state of a tree's singleton, carrying its anchored root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingletonRecord {
    pub coin_id: Bytes32,
    pub launcher_id: Bytes32,
    /// Anchored root; all zeroes for an empty tree
    pub root: Bytes32,
    pub inner_puzzle_hash: Bytes32,
    pub confirmed: bool,
    pub confirmed_at_height: u32,
    pub generation: u32,
    pub timestamp: u64,
}

impl SingletonRecord {
    /// The anchored root, `None` when it is the empty tree
    pub fn root_hash(&self) -> Option<Bytes32> {
        self.root.into_option()
    }
}
