//! Fixed size 32 byte digests

use crate::{CryptoError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of a digest in bytes (256 bits)
pub const HASH_BYTE_SIZE: usize = 32;

/// A 32 byte value: node hashes, root hashes and tree ids.
///
/// Serializes as a lowercase hex string so it reads naturally in JSON output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bytes32([u8; HASH_BYTE_SIZE]);

impl Bytes32 {
    /// The all-zero value, used on the wire for an empty root
    pub const ZERO: Bytes32 = Bytes32([0u8; HASH_BYTE_SIZE]);

    /// Create from raw bytes
    pub const fn new(bytes: [u8; HASH_BYTE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; HASH_BYTE_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: HASH_BYTE_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Create from a hex string, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_BYTE_SIZE] {
        &self.0
    }

    /// Convert to a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check if every byte is zero
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Map the zero value to `None`, anything else to `Some`
    pub fn into_option(self) -> Option<Self> {
        if self.is_zero() {
            None
        } else {
            Some(self)
        }
    }

    /// Inverse of [`Bytes32::into_option`]
    pub fn from_option(value: Option<Self>) -> Self {
        value.unwrap_or(Self::ZERO)
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", self.to_hex())
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Bytes32 {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for Bytes32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_BYTE_SIZE]> for Bytes32 {
    fn from(bytes: [u8; HASH_BYTE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Bytes32> for [u8; HASH_BYTE_SIZE] {
    fn from(value: Bytes32) -> Self {
        value.0
    }
}

impl TryFrom<&[u8]> for Bytes32 {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_hex().serialize(s)
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_hex_roundtrip() {
        let value = Bytes32::new([0xab; 32]);
        let parsed = Bytes32::from_hex(&value.to_hex()).unwrap();
        assert_eq!(value, parsed);
        assert_eq!(Bytes32::from_hex(&format!("0x{}", value)).unwrap(), value);
    }

    #[rstest]
    #[case(0)]
    #[case(31)]
    #[case(33)]
    #[case(48)]
    fn test_wrong_length_rejected(#[case] length: usize) {
        let result = Bytes32::from_slice(&vec![0u8; length]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidLength { expected: 32, actual }) if actual == length
        ));
    }

    #[test]
    fn test_zero_option_mapping() {
        assert_eq!(Bytes32::ZERO.into_option(), None);
        assert_eq!(Bytes32::from_option(None), Bytes32::ZERO);

        let value = Bytes32::new([1; 32]);
        assert_eq!(value.into_option(), Some(value));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let value = Bytes32::new([0x0f; 32]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, format!("\"{}\"", "0f".repeat(32)));

        let back: Bytes32 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
