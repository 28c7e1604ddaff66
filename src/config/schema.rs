//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::routing::rules::RouteRules;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and request handling settings.
    pub server: ServerConfig,

    /// Router behavior.
    pub router: RouterConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Static asset serving.
    pub assets: AssetsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Fixed-response routes registered on the method router.
    pub routes: Vec<RouteConfig>,

    /// Rules keyed by route pattern (`/api/**`, `/blog/:slug`, ...).
    pub route_rules: BTreeMap<String, RouteRules>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Public base URL; 404s outside of it redirect into it.
    pub base_url: String,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            base_url: "/".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Treat `/a/` and `/a` as different routes.
    pub strict_trailing_slash: bool,

    /// Answer unmatched requests with 404/405 instead of falling through.
    pub preemptive: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strict_trailing_slash: false,
            preemptive: true,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Storage namespace prefix for every entry.
    pub base: String,

    /// `max_age` for cached routes whose rule leaves it unset, in seconds.
    pub default_max_age: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base: "/cache".to_string(),
            default_max_age: 60,
        }
    }
}

/// Static asset configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub enabled: bool,

    /// Directory walked at startup.
    pub dir: String,

    /// URL prefix the directory is served under.
    pub mount: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "public".to_string(),
            mount: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A route answered with a fixed response.
///
/// `{name}` in `body` is replaced by the matching route parameter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route pattern (`/users/:id`, `/files/**path`).
    pub path: String,

    /// HTTP methods; empty means every method.
    #[serde(default)]
    pub methods: Vec<String>,

    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_status() -> u16 {
    200
}
