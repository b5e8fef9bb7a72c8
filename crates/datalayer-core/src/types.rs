//! Value types exchanged with callers

use bytes::Bytes;
use datalayer_crypto::Bytes32;
use datalayer_store::Side;
use serde::{Deserialize, Serialize};

/// Where a new terminal goes: next to `reference_node_hash`, on `side`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub reference_node_hash: Bytes32,
    pub side: Side,
}

impl Placement {
    pub fn new(reference_node_hash: Bytes32, side: Side) -> Self {
        Self {
            reference_node_hash,
            side,
        }
    }
}

/// One entry of a batch changelist
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Change {
    Insert {
        #[serde(with = "hex_bytes")]
        key: Bytes,
        #[serde(with = "hex_bytes")]
        value: Bytes,
        /// Automatic placement when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placement: Option<Placement>,
    },
    Delete {
        #[serde(with = "hex_bytes")]
        key: Bytes,
    },
}

impl Change {
    /// Insert with automatic placement
    pub fn insert(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Change::Insert {
            key: key.into(),
            value: value.into(),
            placement: None,
        }
    }

    /// Insert next to a reference terminal
    pub fn insert_at(key: impl Into<Bytes>, value: impl Into<Bytes>, placement: Placement) -> Self {
        Change::Insert {
            key: key.into(),
            value: value.into(),
            placement: Some(placement),
        }
    }

    pub fn delete(key: impl Into<Bytes>) -> Self {
        Change::Delete { key: key.into() }
    }

    pub fn key(&self) -> &Bytes {
        match self {
            Change::Insert { key, .. } | Change::Delete { key } => key,
        }
    }
}

/// Kind of a diff entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    // Declaration order is the output order for equal keys
    Delete,
    Insert,
}

/// A key/value pair present on only one side of a diff
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub op: OperationType,
    #[serde(with = "hex_bytes")]
    pub key: Bytes,
    #[serde(with = "hex_bytes")]
    pub value: Bytes,
}

impl DiffEntry {
    pub fn insert(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            op: OperationType::Insert,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            op: OperationType::Delete,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A key/value pair read from a tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub hash: Bytes32,
    #[serde(with = "hex_bytes")]
    pub key: Bytes,
    #[serde(with = "hex_bytes")]
    pub value: Bytes,
}

/// A whole tree materialised as nested nodes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNodeView {
    Internal {
        hash: Bytes32,
        left: Box<TreeNodeView>,
        right: Box<TreeNodeView>,
    },
    Terminal {
        hash: Bytes32,
        #[serde(with = "hex_bytes")]
        key: Bytes,
        #[serde(with = "hex_bytes")]
        value: Bytes,
    },
}

impl TreeNodeView {
    pub fn hash(&self) -> Bytes32 {
        match self {
            TreeNodeView::Internal { hash, .. } | TreeNodeView::Terminal { hash, .. } => *hash,
        }
    }
}

/// Serialize byte strings as lowercase hex
pub mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map(Bytes::from).map_err(serde::de::Error::custom)
    }
}
