//! Deterministic cache key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// More parts than this and the suffix is hashed.
const MAX_DIRECT_PARTS: usize = 3;
/// Any part longer than this and the suffix is hashed.
const MAX_DIRECT_PART_LEN: usize = 50;
/// Hex characters kept from the digest.
const HASH_SUFFIX_LEN: usize = 16;

/// Cache key: a namespace plus a direct or hashed suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Derive a key from a namespace and argument list.
    ///
    /// Few, short parts produce a readable `namespace:a:b` key; anything longer
    /// collapses to `namespace:<16 hex chars>` so key length stays bounded.
    pub fn derive<S: AsRef<str>>(namespace: &str, parts: &[S]) -> Self {
        if parts.is_empty() {
            return CacheKey(format!("{}:default", namespace));
        }

        let joined = parts.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(":");

        if parts.len() > MAX_DIRECT_PARTS
            || parts.iter().any(|p| p.as_ref().chars().count() > MAX_DIRECT_PART_LEN)
        {
            let digest = content_hash(&joined);
            return CacheKey(format!("{}:{}", namespace, &digest[..HASH_SUFFIX_LEN]));
        }

        CacheKey(format!("{}:{}", namespace, joined))
    }

    /// Key of the mirrored message list for a session.
    pub fn session_messages(session_id: impl std::fmt::Display) -> Self {
        CacheKey(format!("session:{}:messages", session_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Full SHA-256 hex digest of some content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical form of request text for keying: trimmed, whitespace runs collapsed.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}
