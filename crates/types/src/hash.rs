//! Content-addressed hashing.

use std::fmt;

/// A 32-byte blake3 digest.
///
/// Used for snapshot payload hashes, round hashes, transaction hashes,
/// and (via [`crate::NodeId`]) validator identities.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Hash arbitrary bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Adopt raw digest bytes without hashing.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not exactly 32 bytes long. Callers adopting
    /// digests from the wire must length-check first.
    pub fn from_hash_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Self(out)
    }

    /// The all-zero hash.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps structured logs readable.
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}
