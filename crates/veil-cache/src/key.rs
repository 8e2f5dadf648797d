//! Content-addressed cache keys
//!
//! A key is the SHA-256 digest of the identifier's bytes, so two different
//! identifiers never share a slot. Identity is byte content: the string
//! `"a"` and the byte slice `b"a"` name the same entry.

use sha2::{Digest, Sha256};
use std::fmt;

pub const KEY_SIZE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; KEY_SIZE]);

impl CacheKey {
    pub fn new(identifier: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(identifier.as_ref());
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CacheKey {
    /// Short form, enough to tell keys apart in logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self)
    }
}

impl From<&str> for CacheKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CacheKey {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&String> for CacheKey {
    fn from(id: &String) -> Self {
        Self::new(id)
    }
}

impl From<&[u8]> for CacheKey {
    fn from(id: &[u8]) -> Self {
        Self::new(id)
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(id: Vec<u8>) -> Self {
        Self::new(id)
    }
}

impl From<u64> for CacheKey {
    fn from(id: u64) -> Self {
        Self::new(id.to_le_bytes())
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        *key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_same_bytes_same_key() {
        assert_eq!(CacheKey::from("token"), CacheKey::from(String::from("token")));
        assert_eq!(CacheKey::from("token"), CacheKey::from(&b"token"[..]));
    }

    #[test]
    fn test_distinct_identifiers_distinct_keys() {
        let keys: HashSet<CacheKey> = (0..10_000u64).map(CacheKey::from).collect();
        assert_eq!(keys.len(), 10_000);

        // Same 31-multiplier string hash, different content
        assert_ne!(CacheKey::from("Aa"), CacheKey::from("BB"));
    }

    #[test]
    fn test_display_is_short_hex() {
        let key = CacheKey::from("abc");
        assert_eq!(key.to_string(), "ba7816bf8f01cfea");
        assert_eq!(key.to_hex().len(), 64);
        assert!(key.to_hex().starts_with(&key.to_string()));
    }
}
