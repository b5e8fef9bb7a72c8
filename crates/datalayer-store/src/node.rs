//! Node and root types

use bytes::Bytes;
use datalayer_crypto::{internal_hash, leaf_hash, Bytes32};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage code for the two node kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    /// Node holding two child hashes
    Internal = 1,
    /// Leaf holding one key/value pair
    Terminal = 2,
}

impl NodeType {
    /// Numeric code used by storage backends
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Parse a storage code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(NodeType::Internal),
            2 => Some(NodeType::Terminal),
            _ => None,
        }
    }
}

/// Which child slot of an internal node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    /// The other side
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// A leaf holding one key/value pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalNode {
    pub hash: Bytes32,
    pub key: Bytes,
    pub value: Bytes,
}

impl TerminalNode {
    /// Build a terminal node, deriving its hash
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        let key = key.into();
        let value = value.into();
        Self {
            hash: leaf_hash(&key, &value),
            key,
            value,
        }
    }
}

/// A node pointing at two children
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalNode {
    pub hash: Bytes32,
    pub left_hash: Bytes32,
    pub right_hash: Bytes32,
}

impl InternalNode {
    /// Build an internal node, deriving its hash
    pub fn new(left_hash: Bytes32, right_hash: Bytes32) -> Self {
        Self {
            hash: internal_hash(&left_hash, &right_hash),
            left_hash,
            right_hash,
        }
    }

    /// Build from a child placed on `side` and its sibling on the other side
    pub fn from_side(child: Bytes32, side: Side, sibling: Bytes32) -> Self {
        match side {
            Side::Left => Self::new(child, sibling),
            Side::Right => Self::new(sibling, child),
        }
    }

    /// The side `child` occupies, if it is a child of this node
    pub fn side_of(&self, child: &Bytes32) -> Option<Side> {
        if &self.left_hash == child {
            Some(Side::Left)
        } else if &self.right_hash == child {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// The hash in the given slot
    pub fn child(&self, side: Side) -> Bytes32 {
        match side {
            Side::Left => self.left_hash,
            Side::Right => self.right_hash,
        }
    }

    /// Replace the child `old` with `new`, producing a new node
    pub fn replace_child(&self, old: &Bytes32, new: Bytes32) -> Option<Self> {
        let side = self.side_of(old)?;
        Some(Self::from_side(new, side, self.child(side.other())))
    }
}

/// An immutable, content-addressed tree node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Internal(InternalNode),
    Terminal(TerminalNode),
}

impl Node {
    /// The node's content hash
    pub fn hash(&self) -> Bytes32 {
        match self {
            Node::Internal(node) => node.hash,
            Node::Terminal(node) => node.hash,
        }
    }

    /// The node's kind
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Internal(_) => NodeType::Internal,
            Node::Terminal(_) => NodeType::Terminal,
        }
    }

    /// Recompute the hash from content
    pub fn computed_hash(&self) -> Bytes32 {
        match self {
            Node::Internal(node) => internal_hash(&node.left_hash, &node.right_hash),
            Node::Terminal(node) => leaf_hash(&node.key, &node.value),
        }
    }

    /// Check that the stored hash matches the content
    pub fn is_hash_valid(&self) -> bool {
        self.hash() == self.computed_hash()
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Terminal(_) => None,
        }
    }

    pub fn as_terminal(&self) -> Option<&TerminalNode> {
        match self {
            Node::Terminal(node) => Some(node),
            Node::Internal(_) => None,
        }
    }
}

impl From<InternalNode> for Node {
    fn from(node: InternalNode) -> Self {
        Node::Internal(node)
    }
}

impl From<TerminalNode> for Node {
    fn from(node: TerminalNode) -> Self {
        Node::Terminal(node)
    }
}

/// One entry of a tree's root log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub tree_id: Bytes32,
    /// Top node, `None` for an empty tree
    pub node_hash: Option<Bytes32>,
    pub generation: u32,
}

impl Root {
    pub fn new(tree_id: Bytes32, node_hash: Option<Bytes32>, generation: u32) -> Self {
        Self {
            tree_id,
            node_hash,
            generation,
        }
    }

    /// The generation-0 root written by tree creation
    pub fn empty(tree_id: Bytes32) -> Self {
        Self::new(tree_id, None, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.node_hash.is_none()
    }
}
