//! Stored cache entry.

use serde::{Deserialize, Serialize};

/// One cached value with its freshness metadata. Times are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            value: None,
            integrity: None,
            mtime: None,
            expires: None,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Whether `ttl_ms` has elapsed since `mtime` at `now_ms`. A zero ttl never expires.
    pub fn is_stale(&self, ttl_ms: i64, now_ms: i64) -> bool {
        ttl_ms > 0 && now_ms - self.mtime.unwrap_or(0) > ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_and_optional_fields() {
        let entry = CacheEntry {
            value: Some(3),
            integrity: Some("abc".into()),
            mtime: Some(10),
            expires: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"value": 3, "integrity": "abc", "mtime": 10}));

        let empty: CacheEntry<u32> = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty, CacheEntry::default());
    }

    #[test]
    fn test_staleness() {
        let entry = CacheEntry::<u8> {
            mtime: Some(1_000),
            ..Default::default()
        };
        assert!(!entry.is_stale(1_000, 2_000));
        assert!(entry.is_stale(1_000, 2_001));
        assert!(!entry.is_stale(0, 1_000_000));
    }
}
