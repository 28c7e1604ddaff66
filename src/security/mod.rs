//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Error response:
//!     → headers.rs (nosniff, frame denial, referrer and script policies)
//!
//! Proxied request / response:
//!     → headers.rs (strip hop-by-hop headers in both directions)
//! ```
//!
//! # Design Decisions
//! - Error bodies are JSON and never rendered as documents
//! - No trust in client-supplied connection headers when forwarding

pub mod headers;
