//! Per-verb routing on top of the radix tree.
//!
//! # Responsibilities
//! - Keep one [`MethodRoute`] per registered pattern, inserted once into the trie
//! - Pick the handler for a request's method, or an `all` handler
//! - Fall back to broader patterns when the exact route lacks the method
//!
//! # Design Decisions
//! - The fallback scan walks `match_all` most-specific-first and memoizes the
//!   result on the exact route, so repeated requests skip the scan
//! - Registering a route drops the flattened matcher and all memoized fallbacks
//! - 404/405 are lookup values; only preemptive mode turns them into errors

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::http::Method;
use dashmap::DashMap;

use crate::http::error::HttpError;
use crate::http::event::{Body, Event};
use crate::http::handler::{EventHandler, HandlerResult, Resolved, SharedHandler};
use crate::observability::metrics;
use crate::routing::matcher::RouteMatcher;
use crate::routing::radix::{normalize, Params, RadixRouter, RouterOptions};

/// Verb slot on a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodKey {
    /// Serves every method without a dedicated handler.
    All,
    Method(Method),
}

impl From<Method> for MethodKey {
    fn from(method: Method) -> Self {
        MethodKey::Method(method)
    }
}

/// Handlers registered for one pattern.
pub struct MethodRoute {
    path: String,
    handlers: DashMap<MethodKey, SharedHandler>,
    fallbacks: DashMap<Method, SharedHandler>,
}

impl MethodRoute {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            handlers: DashMap::new(),
            fallbacks: DashMap::new(),
        }
    }

    /// Pattern this route was registered under.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Registered verb slots, excluding memoized fallbacks.
    pub fn methods(&self) -> Vec<MethodKey> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn own_handler(&self, method: &Method) -> Option<SharedHandler> {
        self.handlers
            .get(&MethodKey::Method(method.clone()))
            .or_else(|| self.handlers.get(&MethodKey::All))
            .map(|entry| entry.value().clone())
    }

    fn handler_for(&self, method: &Method) -> Option<SharedHandler> {
        self.own_handler(method)
            .or_else(|| self.fallbacks.get(method).map(|entry| entry.value().clone()))
    }
}

impl std::fmt::Debug for MethodRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRoute")
            .field("path", &self.path)
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

/// A resolved handler.
#[derive(Clone)]
pub struct RouteHit {
    pub route: Arc<MethodRoute>,
    pub handler: SharedHandler,
    pub params: Option<Params>,
}

/// Outcome of [`MethodRouter::match_handler`].
pub enum MethodLookup {
    Matched(RouteHit),
    MethodNotAllowed { path: String, method: Method },
    NotFound { path: String },
}

impl MethodLookup {
    /// Convert 404/405 outcomes into their errors.
    pub fn into_result(self) -> Result<RouteHit, HttpError> {
        match self {
            MethodLookup::Matched(hit) => Ok(hit),
            MethodLookup::MethodNotAllowed { method, .. } => Err(HttpError::method_not_allowed(&method)),
            MethodLookup::NotFound { path } => Err(HttpError::not_found(&path)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MethodRouterOptions {
    pub router: RouterOptions,
    /// Turn "no match" into 404/405 errors instead of passing to the next layer.
    pub preemptive: bool,
}

/// Method-aware router.
pub struct MethodRouter {
    trie: RadixRouter<Arc<MethodRoute>>,
    routes: HashMap<String, Arc<MethodRoute>>,
    matcher: OnceLock<RouteMatcher<Arc<MethodRoute>>>,
    fallback_scans: AtomicU64,
    preemptive: bool,
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<_> = self.routes.keys().collect();
        paths.sort();
        f.debug_struct("MethodRouter")
            .field("routes", &paths)
            .field("preemptive", &self.preemptive)
            .finish_non_exhaustive()
    }
}

impl Default for MethodRouter {
    fn default() -> Self {
        Self::new(MethodRouterOptions::default())
    }
}

impl MethodRouter {
    pub fn new(options: MethodRouterOptions) -> Self {
        Self {
            trie: RadixRouter::new(options.router),
            routes: HashMap::new(),
            matcher: OnceLock::new(),
            fallback_scans: AtomicU64::new(0),
            preemptive: options.preemptive,
        }
    }

    /// Register `handler` for `method` at `path`.
    pub fn add(&mut self, path: &str, handler: SharedHandler, method: impl Into<MethodKey>) -> &mut Self {
        let path = normalize(path, self.trie.options());
        let route = match self.routes.get(path) {
            Some(route) => route.clone(),
            None => {
                let route = Arc::new(MethodRoute::new(path));
                self.trie.insert(path, route.clone());
                self.routes.insert(path.to_string(), route.clone());
                route
            }
        };
        route.handlers.insert(method.into(), handler);

        self.matcher = OnceLock::new();
        for route in self.routes.values() {
            route.fallbacks.clear();
        }
        self
    }

    /// Register `handler` for each of `methods`.
    pub fn add_methods(&mut self, path: &str, handler: SharedHandler, methods: &[Method]) -> &mut Self {
        for method in methods {
            self.add(path, handler.clone(), method.clone());
        }
        self
    }

    /// Register `handler` for every method.
    pub fn add_all(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, MethodKey::All)
    }

    pub fn get(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::GET)
    }

    pub fn post(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::POST)
    }

    pub fn put(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::PUT)
    }

    pub fn patch(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::PATCH)
    }

    pub fn delete(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::DELETE)
    }

    pub fn head(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::HEAD)
    }

    pub fn options(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::OPTIONS)
    }

    pub fn connect(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::CONNECT)
    }

    pub fn trace(&mut self, path: &str, handler: SharedHandler) -> &mut Self {
        self.add(path, handler, Method::TRACE)
    }

    /// Registered routes by pattern.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<MethodRoute>> {
        self.routes.values()
    }

    /// How many lookups needed the `match_all` fallback scan.
    pub fn fallback_scans(&self) -> u64 {
        self.fallback_scans.load(Ordering::Relaxed)
    }

    /// Find the handler for `method` on `path` (query string ignored).
    pub fn match_handler(&self, path: &str, method: &Method) -> MethodLookup {
        let path = path.split_once('?').map_or(path, |(path, _)| path);

        let Some(hit) = self.trie.lookup(path) else {
            return MethodLookup::NotFound { path: path.to_string() };
        };
        let route = hit.data.clone();
        let params = hit.params;

        if let Some(handler) = route.handler_for(method) {
            return MethodLookup::Matched(RouteHit { route, handler, params });
        }

        self.fallback_scans.fetch_add(1, Ordering::Relaxed);
        metrics::record_method_fallback();
        let matcher = self.matcher.get_or_init(|| RouteMatcher::new(&self.trie));
        for candidate in matcher.match_all(path).into_iter().rev() {
            if let Some(handler) = candidate.own_handler(method) {
                tracing::debug!(
                    path = %path,
                    method = %method,
                    fallback = %candidate.path(),
                    "Method resolved through fallback route"
                );
                route.fallbacks.insert(method.clone(), handler.clone());
                return MethodLookup::Matched(RouteHit { route, handler, params });
            }
        }

        MethodLookup::MethodNotAllowed {
            path: path.to_string(),
            method: method.clone(),
        }
    }
}

#[async_trait]
impl EventHandler for MethodRouter {
    async fn handle(&self, event: &mut Event) -> HandlerResult {
        let hit = match self.match_handler(event.path(), event.method()).into_result() {
            Ok(hit) => hit,
            Err(error) if self.preemptive => return Err(error),
            Err(_) => return Ok(None),
        };

        event.matched_route = Some(hit.route.path().to_string());
        event.params = hit.params.unwrap_or_default();

        let body = hit.handler.handle(event).await?;
        if body.is_none() && self.preemptive && !event.is_handled() {
            return Ok(Some(Body::Empty));
        }
        Ok(body)
    }

    fn can_resolve(&self) -> bool {
        true
    }

    async fn resolve(&self, path: &str) -> Option<Resolved> {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        let MethodLookup::Matched(hit) = self.match_handler(&path, &Method::GET) else {
            return None;
        };

        if hit.handler.can_resolve() {
            return hit.handler.resolve(&path).await;
        }
        Some(Resolved {
            route: hit.route.path().to_string(),
            handler: hit.handler,
        })
    }
}
