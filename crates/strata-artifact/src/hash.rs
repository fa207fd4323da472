//! Content hashing primitives
//!
//! Provides [`ContentHash`], a strongly-typed 32-byte Blake3 digest used as
//! the hash signature of resolved source content, and [`SetDigest`] for
//! digests that must not depend on the order entries were fetched in.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::canonical::canonical_bytes;

/// A 32-byte content hash (Blake3)
///
/// Detects accidental drift of source content. Immutable and cheap to
/// clone (Copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes
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

    /// Create hash from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != 32 {
            return Err(HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Compute Blake3 hash of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self::new(*hash.as_bytes())
    }

    /// Compute hash of a JSON document in canonical form
    ///
    /// Object keys are sorted recursively first, so two documents that only
    /// differ in key order hash identically.
    #[inline]
    #[must_use]
    pub fn compute_canonical(value: &serde_json::Value) -> Self {
        Self::compute(&canonical_bytes(value))
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Check if hash is all zeros (placeholder/uninitialized)
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self([0; 32])
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Order-independent digest over a set of keyed entries
///
/// Entries are sorted by key before being fed to Blake3, each part length
/// prefixed, so the resulting [`ContentHash`] is the same for the same
/// logical content regardless of insertion order.
#[derive(Debug, Clone, Default)]
pub struct SetDigest {
    entries: Vec<(String, Vec<u8>)>,
}

impl SetDigest {
    /// Create empty digest builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry with a canonical JSON value
    pub fn add_json(&mut self, key: impl Into<String>, value: &serde_json::Value) -> &mut Self {
        self.entries.push((key.into(), canonical_bytes(value)));
        self
    }

    /// Add an entry with raw bytes
    pub fn add_bytes(&mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.push((key.into(), bytes.into()));
        self
    }

    /// Number of entries added so far
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no entries were added
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finish and produce the digest
    #[must_use]
    pub fn finish(mut self) -> ContentHash {
        self.entries.sort();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for (key, value) in &self.entries {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        }
        ContentHash::new(*hasher.finalize().as_bytes())
    }
}

/// Errors that can occur when working with content hashes
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Invalid hash length
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn content_hash_from_slice_invalid_length() {
        let bytes = vec![1u8; 31];
        let result = ContentHash::from_slice(&bytes);
        assert!(matches!(
            result,
            Err(HashError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn content_hash_compute_deterministic() {
        let h1 = ContentHash::compute(b"hello world");
        let h2 = ContentHash::compute(b"hello world");
        assert_eq!(h1, h2);
        assert_ne!(h1, ContentHash::compute(b"hello there"));
    }

    #[test]
    fn content_hash_display_and_parse() {
        let hash = ContentHash::compute(b"test");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert!(hash.to_string().starts_with(&hash.short()));
    }

    #[test]
    fn content_hash_is_zero() {
        assert!(ContentHash::default().is_zero());
        assert!(!ContentHash::compute(b"test").is_zero());
    }

    #[test]
    fn content_hash_serde_as_hex_string() {
        let hash = ContentHash::compute(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let decoded: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a = json!({"status": "open", "priority": "high", "tags": ["x", "y"]});
        let b = json!({"tags": ["x", "y"], "priority": "high", "status": "open"});
        assert_eq!(ContentHash::compute_canonical(&a), ContentHash::compute_canonical(&b));
    }

    #[test]
    fn set_digest_detects_value_change() {
        let mut a = SetDigest::new();
        a.add_json("item:1", &json!({"status": "open"}));
        let mut b = SetDigest::new();
        b.add_json("item:1", &json!({"status": "closed"}));
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn set_digest_separates_key_and_value() {
        let mut a = SetDigest::new();
        a.add_bytes("ab", b"c".to_vec());
        let mut b = SetDigest::new();
        b.add_bytes("a", b"bc".to_vec());
        assert_ne!(a.finish(), b.finish());
    }

    proptest! {
        #[test]
        fn prop_set_digest_is_order_independent(
            entries in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,12}", 0..20)
        ) {
            let forward: Vec<_> = entries.iter().collect();
            let mut backward = forward.clone();
            backward.reverse();

            let mut a = SetDigest::new();
            for (k, v) in &forward {
                a.add_json(k.as_str(), &serde_json::Value::String((*v).clone()));
            }
            let mut b = SetDigest::new();
            for (k, v) in &backward {
                b.add_json(k.as_str(), &serde_json::Value::String((*v).clone()));
            }
            prop_assert_eq!(a.finish(), b.finish());
        }
    }
}
