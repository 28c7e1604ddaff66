//! Cached async functions with stale-while-revalidate and request coalescing.
//!
//! # Responsibilities
//! - Wrap an async function so results are stored under a per-argument key
//! - Decide freshness from ttl, integrity and a caller-supplied validator
//! - Run at most one refresh per key at a time
//!
//! # Design Decisions
//! - Each refresh is a spawned task shared by every waiting caller, so it
//!   completes and persists even when all callers are dropped
//! - The integrity hash covers the wrapped function's type and the static
//!   options; a mismatch is a hard miss, never served stale
//! - Items are stored with a ttl only when `max_age` is set and swr is off;
//!   with swr the stale entry must survive to be served

use std::any::type_name;
use std::fmt::{self, Display};
use std::future::Future;
use std::panic::resume_unwind;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::entry::CacheEntry;
use crate::cache::hash::{hash_str, hash_value};
use crate::cache::storage::{MemoryStorage, SetOptions, Storage};
use crate::cache::CacheError;
use crate::observability::metrics::{self, CacheOutcome};

pub type KeyFn<A> = Arc<dyn Fn(&A) -> Result<String, CacheError> + Send + Sync>;
pub type ArgsPredicate<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;
pub type ValidateFn<T> = Arc<dyn Fn(&CacheEntry<T>) -> bool + Send + Sync>;
pub type TransformFn<A, T> = Arc<dyn Fn(&CacheEntry<T>, &A) -> Option<T> + Send + Sync>;

type WrappedFn<A, T, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type PendingRefresh<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Static options; all of them feed the integrity hash.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheOptions {
    pub name: String,
    pub group: String,
    /// Storage namespace prefix.
    pub base: String,
    /// Freshness window in seconds. Zero disables expiry by age.
    pub max_age: u64,
    /// Serve an expired value while it is refreshed.
    pub swr: bool,
    /// Advertised `stale-while-revalidate` window in seconds.
    pub stale_max_age: Option<u64>,
    /// Explicit integrity value replacing the computed hash.
    pub integrity: Option<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            name: "_".to_string(),
            group: "functions".to_string(),
            base: "/cache".to_string(),
            max_age: 1,
            swr: true,
            stale_max_age: None,
            integrity: None,
        }
    }
}

impl CacheOptions {
    /// `base:group:name:key.json`, skipping empty parts.
    pub fn storage_key(&self, key: &str) -> String {
        let file = format!("{key}.json");
        [self.base.as_str(), self.group.as_str(), self.name.as_str(), file.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(":")
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.max_age).unwrap_or(i64::MAX / 1000) * 1000
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct Inner<A, T, E> {
    func: WrappedFn<A, T, E>,
    options: CacheOptions,
    integrity: String,
    storage: Arc<dyn Storage>,
    pending: DashMap<String, PendingRefresh<T, E>>,
    get_key: KeyFn<A>,
    should_bypass: Option<ArgsPredicate<A>>,
    should_invalidate: Option<ArgsPredicate<A>>,
    validate: Option<ValidateFn<T>>,
    transform: Option<TransformFn<A, T>>,
}

/// An async function whose results are cached in a [`Storage`].
///
/// ```ignore
/// let lookup = CachedFunctionBuilder::new(|id: u64| async move { fetch_user(id).await })
///     .name("users")
///     .max_age(60)
///     .storage(storage)
///     .build();
/// let user = lookup.call(42).await?;
/// ```
pub struct CachedFunction<A, T, E> {
    inner: Arc<Inner<A, T, E>>,
}

impl<A, T, E> Clone for CachedFunction<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, T, E> fmt::Debug for CachedFunction<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFunction")
            .field("options", &self.inner.options)
            .field("integrity", &self.inner.integrity)
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl<A, T, E> CachedFunction<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    E: From<CacheError> + Clone + Display + Send + Sync + 'static,
{
    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    pub fn integrity(&self) -> &str {
        &self.inner.integrity
    }

    /// Number of refreshes currently in flight.
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    /// Storage key the entry for `args` lives under.
    pub fn storage_key_for(&self, args: &A) -> Result<String, CacheError> {
        (self.inner.get_key)(args).map(|key| self.inner.options.storage_key(&key))
    }

    /// Invoke through the cache.
    pub async fn call(&self, args: A) -> Result<T, E> {
        let inner = &self.inner;

        if inner.should_bypass.as_ref().is_some_and(|bypass| bypass(&args)) {
            metrics::record_cache_lookup(&inner.options.group, CacheOutcome::Bypass);
            return (inner.func)(args).await;
        }

        let key = match (inner.get_key)(&args) {
            Ok(key) => key,
            Err(error) => {
                error.report();
                metrics::record_cache_lookup(&inner.options.group, CacheOutcome::Bypass);
                return (inner.func)(args).await;
            }
        };

        let invalidate = inner.should_invalidate.as_ref().is_some_and(|invalidate| invalidate(&args));
        let (mut value, entry) = inner.clone().get(key, args.clone(), invalidate).await?;

        if let Some(transform) = &inner.transform {
            if let Some(transformed) = transform(&entry, &args) {
                value = transformed;
            }
        }
        Ok(value)
    }
}

impl<A, T, E> Inner<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    E: From<CacheError> + Clone + Display + Send + Sync + 'static,
{
    fn is_valid(&self, entry: &CacheEntry<T>) -> bool {
        entry.value.is_some() && self.validate.as_ref().map_or(true, |validate| validate(entry))
    }

    async fn get(self: Arc<Self>, key: String, args: A, invalidate: bool) -> Result<(T, CacheEntry<T>), E> {
        let storage_key = self.options.storage_key(&key);
        let entry = self.read_entry(&storage_key).await;

        let same_code = entry.integrity.as_deref() == Some(self.integrity.as_str());
        let expired = invalidate
            || !same_code
            || entry.is_stale(self.options.ttl_ms(), now_millis())
            || !self.is_valid(&entry);

        if !expired {
            if let Some(value) = entry.value.clone() {
                metrics::record_cache_lookup(&self.options.group, CacheOutcome::Hit);
                return Ok((value, entry));
            }
        }

        let refresh = self.pending_refresh(&key, storage_key, args);

        if self.options.swr && same_code && !invalidate && self.is_valid(&entry) {
            if let Some(value) = entry.value.clone() {
                tracing::debug!(key = %key, group = %self.options.group, "Serving stale entry while refreshing");
                metrics::record_cache_lookup(&self.options.group, CacheOutcome::Stale);
                return Ok((value, entry));
            }
        }

        metrics::record_cache_lookup(&self.options.group, CacheOutcome::Miss);
        let value = refresh.await?;
        let entry = self.stamp(value.clone());
        Ok((value, entry))
    }

    /// Join the refresh in flight for `key`, or start one.
    fn pending_refresh(self: &Arc<Self>, key: &str, storage_key: String, args: A) -> PendingRefresh<T, E> {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(pending) => {
                tracing::trace!(key = %key, "Joining pending refresh");
                pending.get().clone()
            }
            Entry::Vacant(slot) => {
                let resolution = (self.func)(args);
                let task = tokio::spawn(self.clone().refresh(key.to_string(), storage_key, resolution));
                let key = key.to_string();
                let shared = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => resume_unwind(e.into_panic()),
                        Err(_) => Err(E::from(CacheError::Aborted { key })),
                    }
                }
                .boxed()
                .shared();
                slot.insert(shared.clone());
                shared
            }
        }
    }

    async fn refresh(
        self: Arc<Self>,
        key: String,
        storage_key: String,
        resolution: BoxFuture<'static, Result<T, E>>,
    ) -> Result<T, E> {
        let result = resolution.await;
        match &result {
            Ok(value) => {
                let entry = self.stamp(value.clone());
                if self.is_valid(&entry) {
                    self.persist(&storage_key, &entry).await;
                } else {
                    tracing::debug!(key = %key, "Refreshed value rejected by validator, not stored");
                }
            }
            Err(error) => tracing::warn!(key = %key, error = %error, "Cache refresh failed"),
        }
        self.pending.remove(&key);
        result
    }

    fn stamp(&self, value: T) -> CacheEntry<T> {
        let now = now_millis();
        let ttl = self.options.ttl_ms();
        CacheEntry {
            value: Some(value),
            integrity: Some(self.integrity.clone()),
            mtime: Some(now),
            expires: (ttl > 0).then(|| now + ttl),
        }
    }

    async fn read_entry(&self, storage_key: &str) -> CacheEntry<T> {
        match self.storage.get_item(storage_key).await {
            Ok(None) => CacheEntry::default(),
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                CacheError::Malformed {
                    key: storage_key.to_string(),
                    message: e.to_string(),
                }
                .report();
                CacheEntry::default()
            }),
            Err(source) => {
                CacheError::Read {
                    key: storage_key.to_string(),
                    source,
                }
                .report();
                CacheEntry::default()
            }
        }
    }

    async fn persist(&self, storage_key: &str, entry: &CacheEntry<T>) {
        let value = match serde_json::to_value(entry) {
            Ok(value) => value,
            Err(e) => {
                CacheError::Serialize(e.to_string()).report();
                return;
            }
        };
        let options = if self.options.max_age > 0 && !self.options.swr {
            SetOptions::ttl(self.options.max_age)
        } else {
            SetOptions::default()
        };
        if let Err(source) = self.storage.set_item(storage_key, value, options).await {
            CacheError::Write {
                key: storage_key.to_string(),
                source,
            }
            .report();
        }
    }
}

/// Builder for [`CachedFunction`].
pub struct CachedFunctionBuilder<A, T, E> {
    func: WrappedFn<A, T, E>,
    fn_name: &'static str,
    options: CacheOptions,
    storage: Option<Arc<dyn Storage>>,
    get_key: KeyFn<A>,
    should_bypass: Option<ArgsPredicate<A>>,
    should_invalidate: Option<ArgsPredicate<A>>,
    validate: Option<ValidateFn<T>>,
    transform: Option<TransformFn<A, T>>,
}

impl<A, T, E> CachedFunctionBuilder<A, T, E>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    E: From<CacheError> + Clone + Display + Send + Sync + 'static,
{
    /// Key entries by a hash of the serialized arguments.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::from_parts(func, Arc::new(|args: &A| hash_value(args)))
    }
}

impl<A, T, E> CachedFunctionBuilder<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    E: From<CacheError> + Clone + Display + Send + Sync + 'static,
{
    /// Key entries with `get_key`, for arguments that are not serializable.
    pub fn with_key<F, Fut, K>(func: F, get_key: K) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self::from_parts(func, Arc::new(move |args: &A| Ok(get_key(args))))
    }

    fn from_parts<F, Fut>(func: F, get_key: KeyFn<A>) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            fn_name: type_name::<F>(),
            func: Arc::new(move |args: A| -> BoxFuture<'static, Result<T, E>> { func(args).boxed() }),
            options: CacheOptions::default(),
            storage: None,
            get_key,
            should_bypass: None,
            should_invalidate: None,
            validate: None,
            transform: None,
        }
    }

    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.options.group = group.into();
        self
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.options.base = base.into();
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.options.max_age = seconds;
        self
    }

    pub fn swr(mut self, swr: bool) -> Self {
        self.options.swr = swr;
        self
    }

    pub fn stale_max_age(mut self, seconds: u64) -> Self {
        self.options.stale_max_age = Some(seconds);
        self
    }

    pub fn integrity(mut self, integrity: impl Into<String>) -> Self {
        self.options.integrity = Some(integrity.into());
        self
    }

    /// Defaults to a private [`MemoryStorage`].
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn get_key<K>(mut self, get_key: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.get_key = Arc::new(move |args: &A| Ok(get_key(args)));
        self
    }

    pub fn should_bypass_cache<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.should_bypass = Some(Arc::new(predicate));
        self
    }

    pub fn should_invalidate_cache<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.should_invalidate = Some(Arc::new(predicate));
        self
    }

    /// Extra entry check; an entry failing it is neither served nor stored.
    pub fn validate<V>(mut self, validate: V) -> Self
    where
        V: Fn(&CacheEntry<T>) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// Rewrite the returned value; `None` keeps the cached one.
    pub fn transform<X>(mut self, transform: X) -> Self
    where
        X: Fn(&CacheEntry<T>, &A) -> Option<T> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn build(self) -> CachedFunction<A, T, E> {
        let integrity = match &self.options.integrity {
            Some(integrity) => integrity.clone(),
            None => hash_str(&serde_json::json!({ "fn": self.fn_name, "options": &self.options }).to_string()),
        };

        CachedFunction {
            inner: Arc::new(Inner {
                func: self.func,
                options: self.options,
                integrity,
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>),
                pending: DashMap::new(),
                get_key: self.get_key,
                should_bypass: self.should_bypass,
                should_invalidate: self.should_invalidate,
                validate: self.validate,
                transform: self.transform,
            }),
        }
    }
}
