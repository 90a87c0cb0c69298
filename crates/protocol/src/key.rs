//! Shared-secret key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// AES-256 key derived from a shared secret.
///
/// key = SHA-256(UTF-8 secret). Immutable once built; clone freely.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derives the key from a shared secret.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Derives a key if `secret` is present and non-empty.
    ///
    /// An empty secret disables encryption, matching an unset one.
    pub fn from_optional(secret: Option<&str>) -> Option<Self> {
        secret.filter(|s| !s.is_empty()).map(Self::from_secret)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short non-reversible identifier for logs (first 4 bytes of SHA-256(key), hex).
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey({})", self.fingerprint())
    }
}
