//! Cached event handler.
//!
//! # Responsibilities
//! - Key responses by request path, full URL and declared varying headers
//! - Capture a handler's status, headers and body into one cache entry
//! - Answer conditional requests (`If-None-Match`, `If-Modified-Since`) with 304
//!
//! # Design Decisions
//! - The wrapped handler runs against a fork of the event, so a cached
//!   replay and a fresh render write the real response the same way
//! - Only GET and HEAD are cached; other methods go straight to the handler
//! - Error responses and bodiless responses are served but never stored

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, Method, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::function::{CacheOptions, CachedFunction, CachedFunctionBuilder};
use crate::cache::hash::{escape_key, hash_str, hash_value};
use crate::cache::storage::Storage;
use crate::http::error::HttpError;
use crate::http::event::{Body, Event};
use crate::http::handler::{EventHandler, HandlerResult, Resolved, SharedHandler};

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const PATH_KEY_LEN: usize = 16;

/// A captured response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CachedResponse {
    pub code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// The handler wrote its response directly instead of returning a body.
    #[serde(default)]
    pub handled: bool,
}

/// Options for [`CachedEventHandler`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerCacheOptions {
    #[serde(flatten)]
    pub cache: CacheOptions,
    /// Request headers that split the cache key.
    pub varies: Vec<String>,
    /// Skip storage; only answer conditional requests.
    pub headers_only: bool,
}

impl Default for HandlerCacheOptions {
    fn default() -> Self {
        Self {
            cache: CacheOptions {
                group: "handlers".to_string(),
                ..CacheOptions::default()
            },
            varies: Vec::new(),
            headers_only: false,
        }
    }
}

/// Validators for [`handle_cache_headers`].
#[derive(Debug, Clone, Default)]
pub struct CacheConditions {
    pub modified_time: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub max_age: Option<u64>,
}

pub fn http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE).to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// Set validator and `cache-control` headers; answer 304 when the request's
/// validators match. Returns `true` when the response was written.
pub fn handle_cache_headers(event: &mut Event, conditions: &CacheConditions) -> Result<bool, HttpError> {
    let mut cache_control = vec!["public".to_string()];
    if let Some(max_age) = conditions.max_age {
        cache_control.push(format!("max-age={max_age}"));
        cache_control.push(format!("s-maxage={max_age}"));
    }

    let mut matched = false;
    if let Some(modified) = conditions.modified_time {
        event.set_response_header(header::LAST_MODIFIED.as_str(), &http_date(modified))?;
        let since = event.header(header::IF_MODIFIED_SINCE.as_str()).and_then(parse_http_date);
        if since.is_some_and(|since| since.timestamp() >= modified.timestamp()) {
            matched = true;
        }
    }
    if let Some(etag) = &conditions.etag {
        event.set_response_header(header::ETAG.as_str(), etag)?;
        if event.header(header::IF_NONE_MATCH.as_str()) == Some(etag.as_str()) {
            matched = true;
        }
    }
    event.set_response_header(header::CACHE_CONTROL.as_str(), &cache_control.join(", "))?;

    if matched {
        event.set_status(StatusCode::NOT_MODIFIED);
        event.mark_handled();
    }
    Ok(matched)
}

/// Cache key for `event`: escaped pathname, URL hash, then one part per varying header.
pub fn request_key(event: &Event, varies: &[String]) -> String {
    let url = event.original_url();
    let pathname = url.split_once('?').map_or(url, |(path, _)| path);
    let mut path_key: String = escape_key(pathname).chars().take(PATH_KEY_LEN).collect();
    if path_key.is_empty() {
        path_key.push_str("index");
    }

    let mut parts = vec![format!("{path_key}.{}", hash_str(url))];
    for name in varies {
        let value = event.header(name);
        let value_hash = hash_value(&value).unwrap_or_else(|_| hash_str(""));
        parts.push(format!("{}.{value_hash}", escape_key(name)));
    }
    parts.join(":")
}

fn is_cacheable(response: &CachedResponse) -> bool {
    response.code < 400
        && response.body.is_some()
        && response.headers.get("etag").map(String::as_str) != Some("undefined")
        && response.headers.get("last-modified").map(String::as_str) != Some("undefined")
}

/// Render `event` through `handler` and capture the result.
async fn capture(handler: SharedHandler, request: Arc<Event>, options: HandlerCacheOptions) -> Result<CachedResponse, HttpError> {
    let mut event = request.fork();
    let body = handler.handle(&mut event).await?;
    if let Some(body) = body {
        event.finalize(body);
    }

    let body = event.response.body.as_ref().map(|body| body.to_text().into_owned());
    let mut headers = BTreeMap::new();
    for (name, value) in &event.response.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    if !headers.contains_key("etag") {
        let etag = format!("W/\"{}\"", hash_value(&body).unwrap_or_else(|_| hash_str("")));
        headers.insert("etag".to_string(), etag);
    }
    if !headers.contains_key("last-modified") {
        headers.insert("last-modified".to_string(), http_date(Utc::now()));
    }

    let mut cache_control = Vec::new();
    if options.cache.swr {
        if options.cache.max_age > 0 {
            cache_control.push(format!("s-maxage={}", options.cache.max_age));
        }
        match options.cache.stale_max_age {
            Some(stale) => cache_control.push(format!("stale-while-revalidate={stale}")),
            None => cache_control.push("stale-while-revalidate".to_string()),
        }
    } else if options.cache.max_age > 0 {
        cache_control.push(format!("max-age={}", options.cache.max_age));
    }
    if !cache_control.is_empty() {
        headers.insert("cache-control".to_string(), cache_control.join(", "));
    }

    Ok(CachedResponse {
        code: event.response.status.as_u16(),
        headers,
        body,
        handled: event.is_handled(),
    })
}

fn replay_head(event: &mut Event, response: &CachedResponse) -> Result<(), HttpError> {
    event.set_status(StatusCode::from_u16(response.code).unwrap_or(StatusCode::OK));
    for (name, value) in &response.headers {
        event.set_response_header(name, value)?;
    }
    Ok(())
}

/// Wraps a handler so its responses are cached and replayed.
pub struct CachedEventHandler {
    handler: SharedHandler,
    cached: CachedFunction<Arc<Event>, CachedResponse, HttpError>,
    options: HandlerCacheOptions,
}

impl CachedEventHandler {
    pub fn new(handler: SharedHandler, options: HandlerCacheOptions, storage: Arc<dyn Storage>) -> Self {
        let varies: Vec<String> = options.varies.iter().map(|name| name.to_ascii_lowercase()).collect();

        let inner = handler.clone();
        let capture_options = options.clone();
        let cached = CachedFunctionBuilder::with_key(
            move |request: Arc<Event>| capture(inner.clone(), request, capture_options.clone()),
            move |request: &Arc<Event>| request_key(request, &varies),
        )
        .options(options.cache.clone())
        .storage(storage)
        .should_bypass_cache(|request| !matches!(*request.method(), Method::GET | Method::HEAD))
        .validate(|entry| entry.value.as_ref().is_some_and(is_cacheable))
        .build();

        Self {
            handler,
            cached,
            options,
        }
    }

    pub fn options(&self) -> &HandlerCacheOptions {
        &self.options
    }

    /// Storage key the response for `event` is kept under.
    pub fn storage_key_for(&self, event: &Event) -> Result<String, HttpError> {
        self.cached
            .storage_key_for(&Arc::new(event.fork()))
            .map_err(HttpError::from)
    }
}

#[async_trait]
impl EventHandler for CachedEventHandler {
    async fn handle(&self, event: &mut Event) -> HandlerResult {
        if self.options.headers_only {
            let conditions = CacheConditions {
                max_age: Some(self.options.cache.max_age),
                ..Default::default()
            };
            if handle_cache_headers(event, &conditions)? {
                return Ok(None);
            }
            return self.handler.handle(event).await;
        }

        let response = self.cached.call(Arc::new(event.fork())).await?;
        let Some(body) = response.body.clone() else {
            if response.handled {
                replay_head(event, &response)?;
                event.mark_handled();
            }
            return Ok(None);
        };

        let conditions = CacheConditions {
            modified_time: response.headers.get("last-modified").and_then(|value| parse_http_date(value)),
            etag: response.headers.get("etag").cloned(),
            max_age: Some(self.options.cache.max_age),
        };
        if handle_cache_headers(event, &conditions)? {
            return Ok(None);
        }

        replay_head(event, &response)?;
        Ok(Some(Body::Text(body)))
    }

    fn can_resolve(&self) -> bool {
        self.handler.can_resolve()
    }

    async fn resolve(&self, path: &str) -> Option<Resolved> {
        self.handler.resolve(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use crate::http::handler::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>, status: u16) -> SharedHandler {
        handler_fn(move |event| {
            let counter = counter.clone();
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                event.set_status(StatusCode::from_u16(status).unwrap());
                event.set_response_header("content-type", "text/html")?;
                Ok::<_, HttpError>(Some(Body::text(format!("<p>render {n}</p>"))))
            })
        })
    }

    fn cached(handler: SharedHandler, options: HandlerCacheOptions) -> (CachedEventHandler, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (CachedEventHandler::new(handler, options, storage.clone()), storage)
    }

    fn minute() -> HandlerCacheOptions {
        let mut options = HandlerCacheOptions::default();
        options.cache.max_age = 60;
        options
    }

    #[tokio::test]
    async fn test_response_is_cached_and_replayed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (handler, storage) = cached(counting_handler(counter.clone(), 200), minute());

        let mut first = Event::new(Method::GET, "/page?x=1");
        let body = handler.handle(&mut first).await.unwrap().unwrap();
        assert_eq!(body.to_text(), "<p>render 1</p>");
        assert_eq!(first.response_header("content-type"), Some("text/html"));
        assert_eq!(first.response_header("cache-control"), Some("s-maxage=60, stale-while-revalidate"));
        let etag = first.response_header("etag").unwrap().to_string();
        assert!(etag.starts_with("W/\""));

        let mut second = Event::new(Method::GET, "/page?x=1");
        let body = handler.handle(&mut second).await.unwrap().unwrap();
        assert_eq!(body.to_text(), "<p>render 1</p>");
        assert_eq!(second.response_header("etag"), Some(etag.as_str()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let key = handler.storage_key_for(&second).unwrap();
        assert!(key.starts_with("/cache:handlers:_:page."));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_directly_written_response_is_replayed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = counter.clone();
        let no_content = handler_fn(move |event| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                event.set_status(StatusCode::NO_CONTENT);
                event.set_response_header("x-written", "direct")?;
                event.mark_handled();
                Ok::<_, HttpError>(None)
            })
        });
        let (handler, storage) = cached(no_content, minute());

        for expected_calls in 1..=2 {
            let mut event = Event::new(Method::GET, "/ping");
            assert!(handler.handle(&mut event).await.unwrap().is_none());
            assert!(event.is_handled());
            assert_eq!(event.response.status, StatusCode::NO_CONTENT);
            assert_eq!(event.response_header("x-written"), Some("direct"));
            assert_eq!(counter.load(Ordering::SeqCst), expected_calls);
        }
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_if_none_match_returns_304() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (handler, _) = cached(counting_handler(counter, 200), minute());

        let mut first = Event::new(Method::GET, "/doc");
        handler.handle(&mut first).await.unwrap();
        let etag = first.response_header("etag").unwrap().to_string();

        let mut conditional = Event::new(Method::GET, "/doc").with_header("if-none-match", &etag);
        assert_eq!(handler.handle(&mut conditional).await.unwrap(), None);
        assert!(conditional.is_handled());
        assert_eq!(conditional.response.status, StatusCode::NOT_MODIFIED);
        assert!(conditional.into_response().body.is_empty());
    }

    #[tokio::test]
    async fn test_if_modified_since_returns_304() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (handler, _) = cached(counting_handler(counter, 200), minute());

        let mut first = Event::new(Method::GET, "/doc");
        handler.handle(&mut first).await.unwrap();
        let modified = first.response_header("last-modified").unwrap().to_string();
        assert!(parse_http_date(&modified).is_some());

        let mut conditional = Event::new(Method::GET, "/doc").with_header("if-modified-since", &modified);
        assert_eq!(handler.handle(&mut conditional).await.unwrap(), None);
        assert_eq!(conditional.response.status, StatusCode::NOT_MODIFIED);

        let mut stale = Event::new(Method::GET, "/doc")
            .with_header("if-modified-since", "Thu, 01 Jan 1970 00:00:00 GMT");
        assert!(handler.handle(&mut stale).await.unwrap().is_some());
        assert_eq!(stale.response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_responses_are_not_stored() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (handler, storage) = cached(counting_handler(counter.clone(), 404), minute());

        for _ in 0..2 {
            let mut event = Event::new(Method::GET, "/missing");
            handler.handle(&mut event).await.unwrap();
            assert_eq!(event.response.status, StatusCode::NOT_FOUND);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_varying_headers_split_entries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut options = minute();
        options.varies = vec!["Accept-Language".to_string()];
        let (handler, storage) = cached(counting_handler(counter.clone(), 200), options);

        for lang in ["en", "fr", "en"] {
            let mut event = Event::new(Method::GET, "/home").with_header("accept-language", lang);
            handler.handle(&mut event).await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(storage.len(), 2);
        assert!(storage.keys().iter().all(|key| key.contains(":acceptlanguage.")));
    }

    #[tokio::test]
    async fn test_non_get_bypasses() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (handler, storage) = cached(counting_handler(counter.clone(), 200), minute());

        for _ in 0..2 {
            let mut event = Event::new(Method::POST, "/form");
            handler.handle(&mut event).await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_headers_only() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut options = minute();
        options.headers_only = true;
        let (handler, storage) = cached(counting_handler(counter.clone(), 200), options);

        let mut event = Event::new(Method::GET, "/live");
        assert!(handler.handle(&mut event).await.unwrap().is_some());
        assert_eq!(event.response_header("cache-control"), Some("public, max-age=60, s-maxage=60"));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_request_key_shape() {
        let event = Event::new(Method::GET, "/a/very/long/path/name/here?q=1");
        let key = request_key(&event, &[]);
        let (path, hash) = key.split_once('.').unwrap();
        assert_eq!(path, "averylongpathnam");
        assert_eq!(hash.len(), 10);

        assert!(request_key(&Event::new(Method::GET, "/"), &[]).starts_with("index."));
    }
}
