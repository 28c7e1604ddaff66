//! Asset manifest and the static-asset handler.
//!
//! # Design Decisions
//! - The directory is read once at startup; files changed later are not seen
//! - Etags are strong: `"<size hex>-<content hash>"`

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, Method, StatusCode};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::handler::{http_date, parse_http_date};
use crate::cache::hash::hash_str;
use crate::http::event::{Body, Event};
use crate::http::handler::{EventHandler, HandlerResult, Resolved};
use crate::http::pipeline::join_url;

#[derive(Debug, Error)]
pub enum AssetError {
    /// The configured public directory is missing.
    #[error("asset directory {0} does not exist")]
    MissingDir(PathBuf),

    /// A file or directory could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One file of the public directory.
#[derive(Debug, Clone)]
pub struct Asset {
    /// URL path, always starting with `/`.
    pub path: String,
    pub content_type: &'static str,
    pub etag: String,
    pub mtime: DateTime<Utc>,
    pub bytes: Bytes,
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Every file under a public directory, keyed by URL path.
#[derive(Debug, Default)]
pub struct AssetManifest {
    assets: HashMap<String, Asset>,
}

impl AssetManifest {
    /// Walk `dir` and load every file.
    pub fn from_dir(dir: &Path) -> Result<Self, AssetError> {
        if !dir.is_dir() {
            return Err(AssetError::MissingDir(dir.to_path_buf()));
        }
        let mut manifest = Self::default();
        manifest.walk(dir, dir)?;
        tracing::info!(dir = %dir.display(), assets = manifest.assets.len(), "Asset manifest built");
        Ok(manifest)
    }

    fn walk(&mut self, root: &Path, dir: &Path) -> Result<(), AssetError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| AssetError::Io { path, source }
        };

        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let entry = entry.map_err(io_error(dir))?;
            let path = entry.path();
            let metadata = entry.metadata().map_err(io_error(&path))?;
            if metadata.is_dir() {
                self.walk(root, &path)?;
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else { continue };
            let url_path = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = Bytes::from(fs::read(&path).map_err(io_error(&path))?);
            let mtime = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());

            let asset = Asset {
                path: format!("/{url_path}"),
                content_type: content_type(&path),
                etag: format!("\"{:x}-{}\"", bytes.len(), hash_str(&String::from_utf8_lossy(&bytes))),
                mtime,
                bytes,
            };
            self.assets.insert(asset.path.clone(), asset);
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Asset> {
        self.assets.get(path)
    }

    /// Asset for `path`, falling back to `path/index.html`.
    pub fn find(&self, path: &str) -> Option<&Asset> {
        self.get(path).or_else(|| self.get(&join_url(path, "index.html")))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Serves a manifest over GET/HEAD; misses fall through.
#[derive(Debug, Clone)]
pub struct StaticAssets {
    manifest: Arc<AssetManifest>,
}

impl StaticAssets {
    pub fn new(manifest: AssetManifest) -> Self {
        Self {
            manifest: Arc::new(manifest),
        }
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }
}

fn not_modified(event: &Event, asset: &Asset) -> bool {
    if event.header(header::IF_NONE_MATCH.as_str()) == Some(asset.etag.as_str()) {
        return true;
    }
    event
        .header(header::IF_MODIFIED_SINCE.as_str())
        .and_then(parse_http_date)
        .is_some_and(|since| since.timestamp() >= asset.mtime.timestamp())
}

#[async_trait]
impl EventHandler for StaticAssets {
    async fn handle(&self, event: &mut Event) -> HandlerResult {
        if !matches!(*event.method(), Method::GET | Method::HEAD) {
            return Ok(None);
        }
        let Some(asset) = self.manifest.find(event.pathname()) else {
            return Ok(None);
        };

        event.set_response_header(header::ETAG.as_str(), &asset.etag)?;
        event.set_response_header(header::LAST_MODIFIED.as_str(), &http_date(asset.mtime))?;
        if not_modified(event, asset) {
            event.set_status(StatusCode::NOT_MODIFIED);
            event.mark_handled();
            return Ok(None);
        }

        event.set_response_header(header::CONTENT_TYPE.as_str(), asset.content_type)?;
        event.set_response_header(header::CONTENT_LENGTH.as_str(), &asset.bytes.len().to_string())?;
        Ok(Some(Body::Bytes(asset.bytes.clone())))
    }

    fn can_resolve(&self) -> bool {
        true
    }

    async fn resolve(&self, path: &str) -> Option<Resolved> {
        let asset = self.manifest.find(path)?;
        Some(Resolved {
            route: asset.path.clone(),
            handler: Arc::new(self.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("radix-gateway-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("docs")).unwrap();
        fs::write(dir.join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.join("app.js"), "console.log(1)").unwrap();
        fs::write(dir.join("docs/index.html"), "<h1>docs</h1>").unwrap();
        dir
    }

    #[test]
    fn test_manifest_walks_directory() {
        let dir = public_dir("walk");
        let manifest = AssetManifest::from_dir(&dir).unwrap();
        assert_eq!(manifest.len(), 3);

        let js = manifest.get("/app.js").unwrap();
        assert_eq!(js.content_type, "text/javascript; charset=utf-8");
        assert!(js.etag.starts_with("\"e-"));
        assert_eq!(manifest.find("/docs").unwrap().path, "/docs/index.html");
        assert_eq!(manifest.find("/").unwrap().path, "/index.html");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_dir() {
        let err = AssetManifest::from_dir(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, AssetError::MissingDir(_)));
    }

    #[tokio::test]
    async fn test_serves_and_revalidates() {
        let dir = public_dir("serve");
        let assets = StaticAssets::new(AssetManifest::from_dir(&dir).unwrap());

        let mut event = Event::new(Method::GET, "/docs/");
        let body = assets.handle(&mut event).await.unwrap().unwrap();
        assert_eq!(body.to_text(), "<h1>docs</h1>");
        assert_eq!(event.response_header("content-type"), Some("text/html; charset=utf-8"));
        let etag = event.response_header("etag").unwrap().to_string();

        let mut conditional = Event::new(Method::GET, "/docs/").with_header("if-none-match", &etag);
        assert_eq!(assets.handle(&mut conditional).await.unwrap(), None);
        assert_eq!(conditional.response.status, StatusCode::NOT_MODIFIED);
        assert!(conditional.is_handled());

        let mut post = Event::new(Method::POST, "/app.js");
        assert_eq!(assets.handle(&mut post).await.unwrap(), None);
        let mut missing = Event::new(Method::GET, "/nope.css");
        assert_eq!(assets.handle(&mut missing).await.unwrap(), None);

        assert_eq!(assets.resolve("/app.js").await.unwrap().route, "/app.js");
        assert!(assets.resolve("/nope.css").await.is_none());
        fs::remove_dir_all(dir).unwrap();
    }
}
