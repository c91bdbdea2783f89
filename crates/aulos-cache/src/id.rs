use std::fmt;

use sha2::{Digest, Sha256};

/// 64-bit fingerprint of a resolved transfer URI.
///
/// The fingerprint is deterministic across runs and platforms, which is what
/// lets the on-disk layout be rebuilt by scanning the cache directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheId(u64);

impl CacheId {
    pub fn from_uri(uri: &str) -> CacheId {
        let digest = Sha256::digest(uri.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        CacheId(u64::from_be_bytes(bytes))
    }

    pub(crate) fn from_raw(raw: u64) -> CacheId {
        CacheId(raw)
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
