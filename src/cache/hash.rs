//! Short stable hashes for cache keys and validators.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cache::CacheError;

const HASH_LEN: usize = 10;

/// SHA-256 of `input`, base64url without `-`/`_`, cut to 10 characters.
pub fn hash_str(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    URL_SAFE_NO_PAD
        .encode(digest)
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .take(HASH_LEN)
        .collect()
}

/// Hash of the JSON form of `value`. Object keys are sorted, so equal
/// values hash equally regardless of field order.
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    let value = serde_json::to_value(value).map_err(|e| CacheError::Serialize(e.to_string()))?;
    Ok(hash_str(&value.to_string()))
}

/// Keep only `[A-Za-z0-9_]`.
pub fn escape_key(key: &str) -> String {
    key.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect()
}
