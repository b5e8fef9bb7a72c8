//! Tree hashing using SHA-256
//!
//! Nodes are hashed as a binary tree of atoms and pairs:
//! - an atom `b` hashes to `SHA256(0x01 ‖ b)`
//! - a pair `(l, r)` hashes to `SHA256(0x02 ‖ l ‖ r)`
//!
//! A terminal node is the pair `(key, value)` of two atoms, an internal node is the
//! pair of its children's hashes. The prefixes keep atom and pair digests in
//! separate domains.

use crate::Bytes32;
use sha2::{Digest, Sha256};

const ATOM_PREFIX: u8 = 0x01;
const PAIR_PREFIX: u8 = 0x02;

/// Plain SHA-256 of the given data
pub fn sha256<D: AsRef<[u8]>>(data: D) -> Bytes32 {
    Bytes32::new(Sha256::digest(data.as_ref()).into())
}

/// Hash of an atom
pub fn atom_hash(atom: &[u8]) -> Bytes32 {
    let mut hasher = TreeHasher::new(ATOM_PREFIX);
    hasher.update(atom);
    hasher.finalize()
}

/// Hash of an internal node from its children's hashes
pub fn internal_hash(left: &Bytes32, right: &Bytes32) -> Bytes32 {
    let mut hasher = TreeHasher::new(PAIR_PREFIX);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hasher.finalize()
}

/// Hash of a terminal node holding one key/value pair
pub fn leaf_hash(key: &[u8], value: &[u8]) -> Bytes32 {
    internal_hash(&atom_hash(key), &atom_hash(value))
}

/// Incremental hasher for a single prefixed tree element
pub struct TreeHasher {
    inner: Sha256,
}

impl TreeHasher {
    /// Start a new element with the given domain prefix
    pub fn new(prefix: u8) -> Self {
        let mut inner = Sha256::new();
        inner.update([prefix]);
        Self { inner }
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest
    pub fn finalize(self) -> Bytes32 {
        Bytes32::new(self.inner.finalize().into())
    }
}
