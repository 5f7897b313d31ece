//! Integrity digests for checkpoint payloads
//!
//! Provides [`Checksum`], a strongly-typed 32-byte SHA-256 digest computed over
//! the canonical encoding of a [`StateValue`].

use crate::value::{StateError, StateValue};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte SHA-256 digest
///
/// Immutable and cheap to clone (Copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Create a checksum from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create checksum from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChecksumError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| ChecksumError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Digest arbitrary bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Digest the canonical encoding of a state tree
    ///
    /// # Errors
    /// Fails if the tree has no canonical encoding.
    pub fn of_state(state: &StateValue) -> Result<Self, StateError> {
        Ok(Self::compute(&state.canonical_bytes()?))
    }

    /// Check `data` against this digest
    #[inline]
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Checksum {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for Checksum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing checksums
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// Invalid digest length
    #[error("invalid checksum length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_sha256_vector() {
        let sum = Checksum::compute(b"abc");
        assert_eq!(
            sum.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn from_slice_invalid_length() {
        let result = Checksum::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(ChecksumError::InvalidLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn display_and_parse() {
        let sum = Checksum::compute(b"state");
        let parsed: Checksum = sum.to_string().parse().unwrap();
        assert_eq!(sum, parsed);
        assert!(sum.to_string().starts_with(&sum.short()));
    }

    #[test]
    fn of_state_ignores_insertion_order() {
        let a = StateValue::map().with("x", 1).with("y", 2);
        let b = StateValue::map().with("y", 2).with("x", 1);
        assert_eq!(Checksum::of_state(&a).unwrap(), Checksum::of_state(&b).unwrap());
    }

    #[test]
    fn single_byte_flip_changes_digest() {
        let mut bytes = StateValue::map().with("k", "v").canonical_bytes().unwrap();
        let sum = Checksum::compute(&bytes);
        bytes[2] ^= 0x01;
        assert!(!sum.matches(&bytes));
    }

    #[test]
    fn serde_as_hex_string() {
        let sum = Checksum::compute(b"test");
        let json = serde_json::to_string(&sum).unwrap();
        assert_eq!(json.len(), 66);
        let decoded: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(sum, decoded);
    }
}
