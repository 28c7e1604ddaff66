//! Radix Gateway Library
//!
//! An HTTP gateway built on a radix-tree router, a layered dispatch
//! pipeline and a stale-while-revalidate response cache.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────────▶ http::server ──▶ http::pipeline (App)
//!                                         │
//!                                         ├─▶ routing::rules   (headers, redirect, proxy)
//!                                         ├─▶ assets           (static files)
//!                                         └─▶ routing::method  (radix trie, 404/405)
//!                                                  │
//!                                                  └─▶ cache::handler (swr, 304)
//!                                                          │
//!                                                          └─▶ cache::storage
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;

// Serving
pub mod assets;
pub mod cache;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use http::{App, Event, HttpServer};
pub use lifecycle::Shutdown;
