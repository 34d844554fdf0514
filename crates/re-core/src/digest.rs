//! Canonical content identity: a `{sha256-hex, size-bytes}` pair.

use std::fmt;

/// The sha256 of the empty byte string. Treated as always-present without
/// touching any storage tier.
pub const EMPTY_SHA: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// A content digest: the primary key across every storage tier.
///
/// Two digests are equal only if both the hash and the size match — a blob
/// whose declared size disagrees with its hash names a different digest,
/// never the same one with "wrong metadata".
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Digest {
    pub hash: String,
    pub size_bytes: i64,
}

impl Digest {
    pub fn new(hash: impl Into<String>, size_bytes: i64) -> Self {
        Self {
            hash: hash.into(),
            size_bytes,
        }
    }

    /// Compute the digest of a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        use sha2::{Digest as _, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self {
            hash: hex::encode(hasher.finalize()),
            size_bytes: data.len() as i64,
        }
    }

    /// The sentinel digest naming the empty blob.
    pub fn empty() -> Self {
        Self {
            hash: EMPTY_SHA.to_string(),
            size_bytes: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hash == EMPTY_SHA && self.size_bytes == 0
    }

    /// A digest is well-formed when its hash is exactly 64 lowercase hex
    /// characters and its size is non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.size_bytes >= 0
            && self.hash.len() == 64
            && self.hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    }

    /// The bucketizing prefix used by on-disk layouts: the first 4 hex chars.
    pub fn bucket_prefix(&self) -> &str {
        if self.hash.len() >= 4 {
            &self.hash[0..4]
        } else {
            &self.hash
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}
