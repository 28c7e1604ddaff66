//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, status codes, addresses)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address {0:?}")]
    BindAddress(String),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("base url {0:?} must start with '/'")]
    BaseUrl(String),

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("route path {0:?} must start with '/'")]
    RoutePath(String),

    #[error("route {path}: unknown method {method:?}")]
    Method { path: String, method: String },

    #[error("route {path}: status {status} is outside 100..=999")]
    Status { path: String, status: u16 },

    #[error("route {path} registered twice for {method}")]
    DuplicateRoute { path: String, method: String },

    #[error("rule {pattern}: redirect status {status} is not a 3xx code")]
    RedirectStatus { pattern: String, status: u16 },

    #[error("rule {pattern}: proxy target {to:?} must be an http(s) URL")]
    ProxyTarget { pattern: String, to: String },
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.server.bind_address.clone()));
    }
    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(config.observability.metrics_address.clone()));
    }
    if !config.server.base_url.starts_with('/') {
        errors.push(ValidationError::BaseUrl(config.server.base_url.clone()));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    let mut seen = HashSet::new();
    for route in &config.routes {
        if !route.path.starts_with('/') {
            errors.push(ValidationError::RoutePath(route.path.clone()));
        }
        if !(100..=999).contains(&route.status) {
            errors.push(ValidationError::Status {
                path: route.path.clone(),
                status: route.status,
            });
        }

        let methods = if route.methods.is_empty() { vec!["*".to_string()] } else { route.methods.clone() };
        for method in methods {
            if method != "*" && Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
                errors.push(ValidationError::Method {
                    path: route.path.clone(),
                    method: method.clone(),
                });
            }
            if !seen.insert((route.path.clone(), method.to_ascii_uppercase())) {
                errors.push(ValidationError::DuplicateRoute {
                    path: route.path.clone(),
                    method,
                });
            }
        }
    }

    for (pattern, rules) in &config.route_rules {
        if let Some(redirect) = &rules.redirect {
            if !(300..400).contains(&redirect.status_code) {
                errors.push(ValidationError::RedirectStatus {
                    pattern: pattern.clone(),
                    status: redirect.status_code,
                });
            }
        }
        if let Some(proxy) = &rules.proxy {
            if !(proxy.to.starts_with("http://") || proxy.to.starts_with("https://")) {
                errors.push(ValidationError::ProxyTarget {
                    pattern: pattern.clone(),
                    to: proxy.to.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
