//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout)
//!     → event.rs (request becomes an Event)
//!     → pipeline.rs (layers in registration order, hooks)
//!     → handler.rs (each layer's EventHandler)
//!     → error.rs (HttpError → JSON error response)
//!     → Send to client
//! ```

pub mod error;
pub mod event;
pub mod handler;
pub mod pipeline;
pub mod server;

pub use error::{error_response, HttpError};
pub use event::{Body, Event, Response};
pub use handler::{handler_fn, EventHandler, HandlerFuture, HandlerResult, Resolved, SharedHandler};
pub use pipeline::{join_url, App, AppHooks, AppOptions, Layer, LayerMatch};
pub use server::{AppState, HttpServer};
