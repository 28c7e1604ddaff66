//! Response and function caching.
//!
//! # Data Flow
//! ```text
//! call(args)
//!     → function.rs (bypass? key, integrity, expiry)
//!     → storage.rs (get_item: soft failure = miss)
//!     → fresh: return entry value
//!     → expired: one refresh per key (pending table)
//!         → swr with a usable stale value: return it, refresh detached
//!         → otherwise: await the refresh
//!     → refresh settles: entry.rs stamped → storage.rs (set_item)
//!
//! HTTP request
//!     → handler.rs (key from path + varying headers)
//!     → function.rs (capture the handler's response as one entry)
//!     → conditional request (304) or replay status/headers/body
//! ```
//!
//! # Design Decisions
//! - Store failures never fail a request; they are reported and degrade to recompute
//! - Refreshes run on the tokio runtime and finish even if every caller is gone
//! - The pending table is process-local

pub mod entry;
pub mod function;
pub mod handler;
pub mod hash;
pub mod storage;

use thiserror::Error;

use crate::observability::metrics;

pub use entry::CacheEntry;
pub use function::{CacheOptions, CachedFunction, CachedFunctionBuilder};
pub use handler::{handle_cache_headers, CacheConditions, CachedEventHandler, CachedResponse, HandlerCacheOptions};
pub use storage::{MemoryStorage, SetOptions, Storage, StorageError};

/// Errors raised inside the cache layer.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The store failed on `get_item`.
    #[error("failed to read cache entry {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StorageError,
    },

    /// The store failed on `set_item`.
    #[error("failed to write cache entry {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },

    /// The stored value is not a cache entry.
    #[error("malformed cache entry {key}: {message}")]
    Malformed { key: String, message: String },

    /// Arguments or value could not be serialized.
    #[error("failed to serialize cache data: {0}")]
    Serialize(String),

    /// The refresh task was cancelled before it settled.
    #[error("cache refresh for {key} was aborted")]
    Aborted { key: String },
}

impl CacheError {
    /// Metric label for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Read { .. } => "read",
            CacheError::Write { .. } => "write",
            CacheError::Malformed { .. } => "malformed",
            CacheError::Serialize(_) => "serialize",
            CacheError::Aborted { .. } => "aborted",
        }
    }

    /// Report a soft failure out of band.
    pub fn report(&self) {
        tracing::warn!(kind = self.kind(), error = %self, "Cache error");
        metrics::record_cache_error(self.kind());
    }
}
