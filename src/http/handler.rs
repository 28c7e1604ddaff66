//! Event handler abstraction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::http::error::HttpError;
use crate::http::event::{Body, Event};

/// `Some(body)` ends the pipeline with that body; `None` passes to the next layer.
pub type HandlerResult = Result<Option<Body>, HttpError>;

/// Boxed future returned by closure handlers.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

pub type SharedHandler = Arc<dyn EventHandler>;

/// Result of resolving a path without invoking anything.
#[derive(Clone)]
pub struct Resolved {
    pub route: String,
    pub handler: SharedHandler,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

/// Anything that can serve an [`Event`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &mut Event) -> HandlerResult;

    /// Whether [`EventHandler::resolve`] is meaningful for this handler.
    fn can_resolve(&self) -> bool {
        false
    }

    /// Find the route and handler that would serve `path`.
    async fn resolve(&self, _path: &str) -> Option<Resolved> {
        None
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Event) -> HandlerFuture<'a> + Send + Sync,
{
    async fn handle(&self, event: &mut Event) -> HandlerResult {
        (self.0)(event).await
    }
}

/// Wrap a closure as a handler.
///
/// ```ignore
/// let hello = handler_fn(|event| Box::pin(async move {
///     Ok(Some(Body::text(format!("hello {}", event.param("name").unwrap_or("world")))))
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: for<'a> Fn(&'a mut Event) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}
