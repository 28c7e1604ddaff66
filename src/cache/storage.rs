//! Key-value store contract used by the cache layer.
//!
//! # Responsibilities
//! - Define the async `get_item` / `set_item` / `remove_item` contract
//! - Provide an in-process store honoring per-item TTLs
//!
//! # Design Decisions
//! - Values are `serde_json::Value`; entries are typed one level up
//! - Expired items are dropped lazily on read, there is no sweeper

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

/// Failure reported by a store backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation.
    #[error("storage operation failed: {0}")]
    Backend(String),
}

/// Options for [`Storage::set_item`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Seconds until the store may forget the item.
    pub ttl: Option<u64>,
}

impl SetOptions {
    pub fn ttl(seconds: u64) -> Self {
        Self { ttl: Some(seconds) }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set_item(&self, key: &str, value: Value, options: SetOptions) -> Result<(), StorageError>;

    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
struct StoredItem {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredItem {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<String, StoredItem>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items, expired ones included until read.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.items.iter().map(|item| item.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match self.items.get(key) {
            None => return Ok(None),
            Some(item) if !item.is_expired() => return Ok(Some(item.value.clone())),
            Some(_) => {}
        }
        self.items.remove(key);
        Ok(None)
    }

    async fn set_item(&self, key: &str, value: Value, options: SetOptions) -> Result<(), StorageError> {
        let expires_at = options.ttl.map(|seconds| Instant::now() + Duration::from_secs(seconds));
        self.items.insert(key.to_string(), StoredItem { value, expires_at });
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.remove(key);
        Ok(())
    }
}
