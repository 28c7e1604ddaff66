//! Static asset serving.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     public dir → manifest.rs (walk, hash, content type) → AssetManifest
//!
//! Request (GET/HEAD):
//!     path → manifest lookup (path, then path/index.html)
//!         → conditional request? 304
//!         → bytes with content-type / etag / last-modified
//!     miss → next layer
//! ```

pub mod manifest;

pub use manifest::{Asset, AssetError, AssetManifest, StaticAssets};
