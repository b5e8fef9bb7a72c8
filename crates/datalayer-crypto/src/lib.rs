//! # Data Layer Crypto
//!
//! Hashing primitives for the Data Layer Merkle key/value store.
//!
//! This crate provides:
//! - **Bytes32**: The 32 byte digest used for node hashes and tree ids
//! - **Tree hashing**: SHA-256 over the canonical pair/atom serialization
//!
//! The hash function is part of the replication contract: two peers only agree on
//! a root hash if they hash nodes identically, so nothing here may change without
//! a format version bump.
//!
//! ## Example
//!
//! ```rust
//! use datalayer_crypto::{internal_hash, leaf_hash};
//!
//! let a = leaf_hash(b"a", &[0x00, 0x01]);
//! let b = leaf_hash(b"b", &[0x03, 0x05]);
//! let root = internal_hash(&a, &b);
//! assert_ne!(root, internal_hash(&b, &a));
//! ```

pub mod bytes32;
pub mod error;
pub mod hashing;

pub use bytes32::{Bytes32, HASH_BYTE_SIZE};
pub use error::{CryptoError, Result};
pub use hashing::{atom_hash, internal_hash, leaf_hash, sha256, TreeHasher};

/// Version of the node hashing format
pub const HASH_FORMAT_VERSION: &str = "1.0";
