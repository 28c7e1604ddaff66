//! Build the dispatch pipeline from configuration.
//!
//! Layer order is fixed: route rules, static assets, then the method router.
//! Rules run first so redirects and proxies win over anything local.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, Method, StatusCode};
use thiserror::Error;

use crate::assets::{AssetError, AssetManifest, StaticAssets};
use crate::cache::hash::escape_key;
use crate::cache::{CacheOptions, CachedEventHandler, HandlerCacheOptions, Storage};
use crate::config::{ConfigError, GatewayConfig, RouteConfig};
use crate::http::event::{Body, Event};
use crate::http::handler::{EventHandler, HandlerResult, SharedHandler};
use crate::http::pipeline::{App, AppOptions};
use crate::routing::radix::NodeKind;
use crate::routing::{MethodRouter, MethodRouterOptions, RouteRulesHandler, RouteRulesMatcher, RouterOptions};

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("static assets: {0}")]
    Assets(#[from] AssetError),

    #[error("route {path}: {message}")]
    Route { path: String, message: String },

    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Assemble the full pipeline for `config`.
pub fn build_app(config: &GatewayConfig, storage: Arc<dyn Storage>) -> Result<App, StartupError> {
    let router_options = RouterOptions {
        strict_trailing_slash: config.router.strict_trailing_slash,
    };
    let mut app = App::new(AppOptions {
        base_url: config.server.base_url.clone(),
    });

    let rules = if config.route_rules.is_empty() {
        None
    } else {
        Some(RouteRulesMatcher::new(&config.route_rules, router_options))
    };

    if let Some(matcher) = &rules {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.server.request_timeout_secs))
            .build()?;
        app.use_handler(Arc::new(RouteRulesHandler::new(matcher.clone(), client)));
        tracing::info!(patterns = config.route_rules.len(), "Route rules enabled");
    }

    if config.assets.enabled {
        let manifest = AssetManifest::from_dir(&PathBuf::from(&config.assets.dir))?;
        tracing::info!(
            dir = %config.assets.dir,
            mount = %config.assets.mount,
            assets = manifest.len(),
            "Static assets loaded"
        );
        app.use_at(&config.assets.mount, Arc::new(StaticAssets::new(manifest)));
    }

    let router = build_router(config, storage, rules.as_ref())?;
    app.use_handler(Arc::new(router));

    Ok(app)
}

/// Register every configured route on a fresh [`MethodRouter`].
///
/// Routes whose merged rules carry a `cache` entry are wrapped in a
/// [`CachedEventHandler`].
pub fn build_router(
    config: &GatewayConfig,
    storage: Arc<dyn Storage>,
    rules: Option<&RouteRulesMatcher>,
) -> Result<MethodRouter, StartupError> {
    let mut router = MethodRouter::new(MethodRouterOptions {
        router: RouterOptions {
            strict_trailing_slash: config.router.strict_trailing_slash,
        },
        preemptive: config.router.preemptive,
    });

    for route in &config.routes {
        let mut handler: SharedHandler = Arc::new(ConfiguredRoute::new(route)?);

        let cache_rule = rules.and_then(|matcher| matcher.rules_for(&route.path).cache);
        if let Some(rule) = cache_rule {
            let options = HandlerCacheOptions {
                cache: CacheOptions {
                    name: rule.name.clone().unwrap_or_else(|| route_cache_name(&route.path)),
                    group: rule.group.clone().unwrap_or_else(|| "routes".to_string()),
                    base: config.cache.base.clone(),
                    max_age: rule.max_age.unwrap_or(config.cache.default_max_age),
                    swr: rule.swr.unwrap_or(true),
                    stale_max_age: rule.stale_max_age,
                    integrity: None,
                },
                varies: rule.varies.clone().unwrap_or_default(),
                headers_only: rule.headers_only.unwrap_or(false),
            };
            tracing::debug!(path = %route.path, name = %options.cache.name, "Caching route");
            handler = Arc::new(CachedEventHandler::new(handler, options, storage.clone()));
        }

        let methods = parse_methods(route)?;
        if methods.is_empty() {
            router.add_all(&route.path, handler);
        } else {
            router.add_methods(&route.path, handler, &methods);
        }
    }

    tracing::info!(routes = config.routes.len(), "Routes registered");
    Ok(router)
}

/// Empty result means every method.
fn parse_methods(route: &RouteConfig) -> Result<Vec<Method>, StartupError> {
    if route.methods.iter().any(|name| name == "*") {
        return Ok(Vec::new());
    }
    route
        .methods
        .iter()
        .map(|name| {
            Method::from_bytes(name.to_ascii_uppercase().as_bytes()).map_err(|e| StartupError::Route {
                path: route.path.clone(),
                message: format!("invalid method {name}: {e}"),
            })
        })
        .collect()
}

/// Cache name for a route pattern: static segments escaped, dynamic ones as `_`.
fn route_cache_name(path: &str) -> String {
    let name = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match NodeKind::of(segment) {
            NodeKind::Static => escape_key(segment),
            _ => "_".to_string(),
        })
        .collect::<Vec<_>>()
        .join("_");
    if name.is_empty() {
        "index".to_string()
    } else {
        name
    }
}

/// Replace `{name}` with the matching route parameter. Unknown names stay as written.
fn render_template(template: &str, event: &Event) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match event.param(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Fixed response declared in `[[routes]]`.
struct ConfiguredRoute {
    status: StatusCode,
    body: String,
    content_type: Option<String>,
    headers: Vec<(String, String)>,
}

impl ConfiguredRoute {
    fn new(route: &RouteConfig) -> Result<Self, StartupError> {
        let status = StatusCode::from_u16(route.status).map_err(|e| StartupError::Route {
            path: route.path.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            status,
            body: route.body.clone(),
            content_type: route.content_type.clone(),
            headers: route.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }
}

#[async_trait]
impl EventHandler for ConfiguredRoute {
    async fn handle(&self, event: &mut Event) -> HandlerResult {
        event.set_status(self.status);
        for (name, value) in &self.headers {
            event.set_response_header(name, value)?;
        }
        if let Some(content_type) = &self.content_type {
            event.set_response_header(header::CONTENT_TYPE.as_str(), content_type)?;
        }
        if self.body.is_empty() {
            return Ok(Some(Body::Empty));
        }
        Ok(Some(Body::text(render_template(&self.body, event))))
    }
}
