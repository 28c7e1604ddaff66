//! Layered request dispatch.
//!
//! # Data Flow
//! ```text
//! Event
//!     → on_request hook
//!     → for each layer (registration order):
//!         route prefix check, prefix stripped from the visible path
//!         optional match predicate
//!         handler → Some(body): before/after hooks, done
//!                 → handled:    after hook, done
//!                 → None:       next layer
//!     → nothing handled: 404
//! Any error → capture hook → single error handler → JSON error response
//! ```
//!
//! # Design Decisions
//! - No per-layer error handling; every error unwinds to one place
//! - Layers are append-only and tried strictly in order
//! - A failing capture hook is logged and never blocks the response

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::http::error::{error_response, HttpError};
use crate::http::event::{Body, Event, Response};
use crate::http::handler::{Resolved, SharedHandler};
use crate::observability::metrics;

/// Predicate deciding whether a layer applies to `(sub_path, event)`.
pub type LayerMatch = Arc<dyn Fn(&str, &Event) -> bool + Send + Sync>;

/// Boxed error returned by a failing capture hook.
pub type CaptureError = Box<dyn std::error::Error + Send + Sync>;

/// One entry of the middleware stack.
#[derive(Clone)]
pub struct Layer {
    route: String,
    matcher: Option<LayerMatch>,
    handler: SharedHandler,
}

impl Layer {
    pub fn new(route: impl Into<String>, handler: SharedHandler) -> Self {
        let mut route = route.into();
        if route.len() > 1 && route.ends_with('/') {
            route.pop();
        }
        if route.is_empty() {
            route.push('/');
        }
        Self {
            route,
            matcher: None,
            handler,
        }
    }

    pub fn with_match(mut self, matcher: LayerMatch) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// Sub-path seen by this layer's handler, or `None` if the prefix differs.
    fn sub_path(&self, path: &str) -> Option<String> {
        if self.route.len() <= 1 {
            return Some(path.to_string());
        }
        let rest = path.strip_prefix(self.route.as_str())?;
        Some(if rest.is_empty() { "/".to_string() } else { rest.to_string() })
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("route", &self.route)
            .field("has_match", &self.matcher.is_some())
            .finish_non_exhaustive()
    }
}

/// Lifecycle hooks around dispatch. Every method defaults to a no-op.
#[async_trait]
pub trait AppHooks: Send + Sync {
    async fn on_request(&self, _event: &mut Event) -> Result<(), HttpError> {
        Ok(())
    }

    async fn on_before_response(&self, _event: &mut Event, _body: &mut Body) -> Result<(), HttpError> {
        Ok(())
    }

    async fn on_after_response(&self, _event: &Event) {}

    /// Out-of-band error reporting.
    async fn capture_error(&self, _error: &HttpError, _event: &Event) -> Result<(), CaptureError> {
        Ok(())
    }
}

struct NoHooks;

impl AppHooks for NoHooks {}

#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Public base URL; 404s outside of it redirect into it.
    pub base_url: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            base_url: "/".to_string(),
        }
    }
}

/// Ordered middleware stack.
pub struct App {
    stack: Vec<Layer>,
    hooks: Arc<dyn AppHooks>,
    options: AppOptions,
}

impl Default for App {
    fn default() -> Self {
        Self::new(AppOptions::default())
    }
}

impl App {
    pub fn new(options: AppOptions) -> Self {
        Self {
            stack: Vec::new(),
            hooks: Arc::new(NoHooks),
            options,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AppHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Append a layer serving every path.
    pub fn use_handler(&mut self, handler: SharedHandler) -> &mut Self {
        self.push(Layer::new("/", handler))
    }

    /// Append a layer mounted at `route`.
    pub fn use_at(&mut self, route: &str, handler: SharedHandler) -> &mut Self {
        self.push(Layer::new(route, handler))
    }

    /// Append a layer mounted at `route` that also requires `matcher`.
    pub fn use_matching(&mut self, route: &str, matcher: LayerMatch, handler: SharedHandler) -> &mut Self {
        self.push(Layer::new(route, handler).with_match(matcher))
    }

    pub fn push(&mut self, layer: Layer) -> &mut Self {
        tracing::debug!(route = %layer.route, "Layer registered");
        self.stack.push(layer);
        self
    }

    pub fn layers(&self) -> &[Layer] {
        &self.stack
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Run `event` through the stack. Never fails: errors become responses.
    pub async fn handle(&self, mut event: Event) -> Response {
        let start = Instant::now();
        let method = event.method().clone();

        let response = match self.dispatch(&mut event).await {
            Ok(()) => event.into_response(),
            Err(error) => self.handle_error(error, event).await,
        };

        metrics::record_request(method.as_str(), response.status.as_u16(), start);
        response
    }

    async fn dispatch(&self, event: &mut Event) -> Result<(), HttpError> {
        self.hooks.on_request(event).await?;

        let request_path = event.path().to_string();
        for layer in &self.stack {
            let Some(layer_path) = layer.sub_path(&request_path) else {
                continue;
            };
            if let Some(matcher) = &layer.matcher {
                if !matcher(&layer_path, event) {
                    continue;
                }
            }

            event.set_path(layer_path);
            if let Some(mut body) = layer.handler.handle(event).await? {
                self.hooks.on_before_response(event, &mut body).await?;
                event.finalize(body);
                self.hooks.on_after_response(event).await;
                return Ok(());
            }
            if event.is_handled() {
                self.hooks.on_after_response(event).await;
                return Ok(());
            }
        }

        let path = if request_path.is_empty() { "/" } else { request_path.as_str() };
        Err(HttpError::new(404).with_status_message(format!("Cannot find any path matching {path}.")))
    }

    async fn handle_error(&self, error: HttpError, event: Event) -> Response {
        if let Err(capture_error) = self.hooks.capture_error(&error, &event).await {
            tracing::warn!(error = %capture_error, "Error capture hook failed");
        }

        if error.is_sensitive() {
            tracing::error!(
                tags = %error.tags(),
                method = %event.method(),
                url = %event.original_url(),
                error = %error,
                "Request error"
            );
        } else {
            tracing::debug!(
                status = error.status_code(),
                url = %event.original_url(),
                message = %error.message(),
                "Request failed"
            );
        }

        if event.is_handled() {
            return event.into_response();
        }
        error_response(&error, &event, &self.options.base_url)
    }

    /// Find the layer and handler that would serve `path`, without running it.
    pub async fn resolve(&self, path: &str) -> Option<Resolved> {
        for layer in &self.stack {
            if layer.route == "/" && !layer.handler.can_resolve() {
                continue;
            }
            let Some(rest) = path.strip_prefix(layer.route.as_str()) else {
                continue;
            };
            let layer_path = if rest.is_empty() { "/".to_string() } else { rest.to_string() };
            if let Some(matcher) = &layer.matcher {
                let probe = Event::new(axum::http::Method::GET, layer_path.clone());
                if !matcher(&layer_path, &probe) {
                    continue;
                }
            }

            if !layer.handler.can_resolve() {
                return Some(Resolved {
                    route: layer.route.clone(),
                    handler: layer.handler.clone(),
                });
            }
            let Some(inner) = layer.handler.resolve(&layer_path).await else {
                continue;
            };
            return Some(Resolved {
                route: join_url(&layer.route, &inner.route),
                handler: inner.handler,
            });
        }
        None
    }
}

/// Join two URL path fragments with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) if !base.is_empty() && !path.is_empty() => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use axum::http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_path() -> SharedHandler {
        handler_fn(|event| Box::pin(async move { Ok(Some(Body::text(event.path().to_string()))) }))
    }

    fn pass() -> SharedHandler {
        handler_fn(|_event| Box::pin(async { Ok(None) }))
    }

    #[tokio::test]
    async fn test_prefix_is_stripped() {
        let mut app = App::default();
        app.use_at("/api", echo_path());

        let response = app.handle(Event::new(Method::GET, "/api/users?x=1")).await;
        assert_eq!(response.text(), "/users?x=1");

        let response = app.handle(Event::new(Method::GET, "/api")).await;
        assert_eq!(response.text(), "/");
    }

    #[tokio::test]
    async fn test_layers_tried_in_order() {
        let mut app = App::default();
        app.use_handler(pass())
            .use_at("/other", handler_fn(|_e| Box::pin(async { Ok(Some(Body::text("other"))) })))
            .use_handler(handler_fn(|_e| Box::pin(async { Ok(Some(Body::text("first"))) })))
            .use_handler(handler_fn(|_e| Box::pin(async { Ok(Some(Body::text("second"))) })));

        let response = app.handle(Event::new(Method::GET, "/x")).await;
        assert_eq!(response.text(), "first");
        let response = app.handle(Event::new(Method::GET, "/other/x")).await;
        assert_eq!(response.text(), "other");
    }

    #[tokio::test]
    async fn test_match_predicate_skips_layer() {
        let mut app = App::default();
        app.use_matching(
            "/",
            Arc::new(|path: &str, _event: &Event| path.ends_with(".json")),
            handler_fn(|_e| Box::pin(async { Ok(Some(Body::text("json"))) })),
        )
        .use_handler(handler_fn(|_e| Box::pin(async { Ok(Some(Body::text("fallback"))) })));

        assert_eq!(app.handle(Event::new(Method::GET, "/a.json")).await.text(), "json");
        assert_eq!(app.handle(Event::new(Method::GET, "/a.txt")).await.text(), "fallback");
    }

    #[tokio::test]
    async fn test_handled_event_stops_iteration() {
        let later = Arc::new(AtomicUsize::new(0));
        let counter = later.clone();
        let mut app = App::default();
        app.use_handler(handler_fn(|event| {
            Box::pin(async move {
                event.set_status(StatusCode::NO_CONTENT);
                event.mark_handled();
                Ok(None)
            })
        }))
        .use_handler(handler_fn(move |_e| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Some(Body::text("late"))) })
        }));

        let response = app.handle(Event::new(Method::GET, "/")).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unhandled_request_is_404() {
        let mut app = App::default();
        app.use_handler(pass());
        let response = app.handle(Event::new(Method::GET, "/nowhere")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let body = response.json().unwrap();
        assert_eq!(body["statusMessage"], "Cannot find any path matching /nowhere.");
    }

    #[tokio::test]
    async fn test_handler_error_reaches_error_handler() {
        let mut app = App::default();
        app.use_handler(handler_fn(|_e| {
            Box::pin(async { Err(HttpError::new(418).with_status_message("Teapot")) })
        }));
        let response = app.handle(Event::new(Method::GET, "/")).await;
        assert_eq!(response.status.as_u16(), 418);
        assert_eq!(response.header("referrer-policy"), Some("no-referrer"));
        assert_eq!(response.json().unwrap()["message"], "Teapot");
    }

    struct Hooks {
        captured: AtomicUsize,
        fail_capture: bool,
    }

    #[async_trait]
    impl AppHooks for Hooks {
        async fn on_before_response(&self, event: &mut Event, _body: &mut Body) -> Result<(), HttpError> {
            event.set_response_header("x-powered-by", "radix-gateway")
        }

        async fn capture_error(&self, _error: &HttpError, _event: &Event) -> Result<(), CaptureError> {
            self.captured.fetch_add(1, Ordering::SeqCst);
            if self.fail_capture {
                return Err("reporter offline".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hooks() {
        let hooks = Arc::new(Hooks {
            captured: AtomicUsize::new(0),
            fail_capture: true,
        });
        let mut app = App::default().with_hooks(hooks.clone());
        app.use_at("/ok", handler_fn(|_e| Box::pin(async { Ok(Some(Body::text("ok"))) })));

        let response = app.handle(Event::new(Method::GET, "/ok")).await;
        assert_eq!(response.header("x-powered-by"), Some("radix-gateway"));

        // Capture fails but the error response is still produced.
        let response = app.handle(Event::new(Method::GET, "/missing")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(hooks.captured.load(Ordering::SeqCst), 1);
    }

    struct Resolving;

    #[async_trait]
    impl crate::http::handler::EventHandler for Resolving {
        async fn handle(&self, _event: &mut Event) -> crate::http::handler::HandlerResult {
            Ok(None)
        }

        fn can_resolve(&self) -> bool {
            true
        }

        async fn resolve(&self, path: &str) -> Option<Resolved> {
            (path == "/known").then(|| Resolved {
                route: "/known".to_string(),
                handler: Arc::new(Resolving),
            })
        }
    }

    #[tokio::test]
    async fn test_resolver() {
        let mut app = App::default();
        app.use_handler(echo_path())
            .use_at("/assets", Arc::new(Resolving))
            .use_at("/plain", echo_path());

        let resolved = app.resolve("/assets/known").await.unwrap();
        assert_eq!(resolved.route, "/assets/known");
        assert!(app.resolve("/assets/unknown").await.is_none());

        let resolved = app.resolve("/plain/anything").await.unwrap();
        assert_eq!(resolved.route, "/plain");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("/", "/a"), "/a");
        assert_eq!(join_url("/api", "/a"), "/api/a");
        assert_eq!(join_url("/api/", "a"), "/api/a");
        assert_eq!(join_url("https://up.example/v1", "/users?x=1"), "https://up.example/v1/users?x=1");
    }
}
