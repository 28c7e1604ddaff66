//! Declarative per-pattern route rules.
//!
//! # Responsibilities
//! - Hold `headers` / `redirect` / `proxy` / `cache` rules keyed by route pattern
//! - Merge every rule set that applies to a path, most specific winning
//! - Apply the merged rules as a pipeline layer
//!
//! # Design Decisions
//! - Rules are flattened once at startup into a [`RouteMatcher`]
//! - Header maps merge key by key and cache rules field by field;
//!   redirect and proxy targets replace each other whole
//! - A `/**` pattern remembers its base so `to = ".../**"` targets can
//!   re-root the request path under the new prefix

use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::http::error::HttpError;
use crate::http::event::{Body, Event};
use crate::http::handler::{EventHandler, HandlerResult};
use crate::http::pipeline::join_url;
use crate::routing::matcher::RouteMatcher;
use crate::routing::radix::{RadixRouter, RouterOptions};
use crate::security::headers::is_hop_by_hop;

fn default_redirect_status() -> u16 {
    307
}

/// Redirect every matching request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedirectRule {
    pub to: String,

    #[serde(default = "default_redirect_status")]
    pub status_code: u16,

    /// Base removed from the request path when `to` ends with `/**`.
    #[serde(skip)]
    pub strip_base: Option<String>,
}

/// Forward every matching request to another origin.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProxyRule {
    pub to: String,

    #[serde(skip)]
    pub strip_base: Option<String>,
}

/// Response caching for matching routes. Unset fields inherit from broader rules.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheRule {
    pub max_age: Option<u64>,
    pub swr: Option<bool>,
    pub stale_max_age: Option<u64>,
    pub varies: Option<Vec<String>>,
    pub headers_only: Option<bool>,
    pub group: Option<String>,
    pub name: Option<String>,
}

impl CacheRule {
    fn overlay(&mut self, other: &CacheRule) {
        if other.max_age.is_some() {
            self.max_age = other.max_age;
        }
        if other.swr.is_some() {
            self.swr = other.swr;
        }
        if other.stale_max_age.is_some() {
            self.stale_max_age = other.stale_max_age;
        }
        if other.varies.is_some() {
            self.varies.clone_from(&other.varies);
        }
        if other.headers_only.is_some() {
            self.headers_only = other.headers_only;
        }
        if other.group.is_some() {
            self.group.clone_from(&other.group);
        }
        if other.name.is_some() {
            self.name.clone_from(&other.name);
        }
    }
}

/// Rules declared for one pattern, or merged for one path.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteRules {
    pub headers: BTreeMap<String, String>,
    pub redirect: Option<RedirectRule>,
    pub proxy: Option<ProxyRule>,
    pub cache: Option<CacheRule>,
}

impl RouteRules {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.redirect.is_none() && self.proxy.is_none() && self.cache.is_none()
    }

    /// Record the strip base of a `/**` pattern on its redirect/proxy targets.
    fn for_pattern(mut self, pattern: &str) -> Self {
        if let Some(base) = pattern.strip_suffix("/**") {
            if let Some(redirect) = self.redirect.as_mut() {
                redirect.strip_base = Some(base.to_string());
            }
            if let Some(proxy) = self.proxy.as_mut() {
                proxy.strip_base = Some(base.to_string());
            }
        }
        self
    }

    /// Overlay `specific` on top of `self`.
    fn overlay(&mut self, specific: &RouteRules) {
        for (name, value) in &specific.headers {
            self.headers.insert(name.clone(), value.clone());
        }
        if specific.redirect.is_some() {
            self.redirect.clone_from(&specific.redirect);
        }
        if specific.proxy.is_some() {
            self.proxy.clone_from(&specific.proxy);
        }
        if let Some(cache) = &specific.cache {
            self.cache.get_or_insert_with(CacheRule::default).overlay(cache);
        }
    }
}

/// Pattern-keyed rules, flattened for `match_all` lookups.
#[derive(Debug, Clone)]
pub struct RouteRulesMatcher {
    matcher: RouteMatcher<RouteRules>,
}

impl RouteRulesMatcher {
    pub fn new(rules: &BTreeMap<String, RouteRules>, options: RouterOptions) -> Self {
        let router = RadixRouter::from_routes(
            options,
            rules
                .iter()
                .map(|(pattern, rules)| (pattern.as_str(), rules.clone().for_pattern(pattern))),
        );
        Self {
            matcher: RouteMatcher::new(&router),
        }
    }

    /// Merged rules for `path` (query string ignored).
    pub fn rules_for(&self, path: &str) -> RouteRules {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        self.matcher
            .match_all(path)
            .into_iter()
            .fold(RouteRules::default(), |mut merged, rules| {
                merged.overlay(rules);
                merged
            })
    }
}

/// Remove `base` from the front of `path` when it is a whole-segment prefix.
pub fn without_base(path: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(base) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        Some(rest) if rest.starts_with('?') => format!("/{rest}"),
        _ => path.to_string(),
    }
}

/// Append a raw query string to `url`.
pub fn with_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

/// Target URL for a redirect/proxy rule applied to `path` (with query).
pub fn rewrite_target(to: &str, strip_base: Option<&str>, path: &str) -> String {
    if let Some(prefix) = to.strip_suffix("/**") {
        let path = match strip_base {
            Some(base) => without_base(path, base),
            None => path.to_string(),
        };
        return join_url(prefix, &path);
    }
    match path.split_once('?') {
        Some((_, query)) => with_query(to, query),
        None => to.to_string(),
    }
}

/// Pipeline layer applying merged route rules.
pub struct RouteRulesHandler {
    matcher: RouteRulesMatcher,
    client: reqwest::Client,
}

impl RouteRulesHandler {
    pub fn new(matcher: RouteRulesMatcher, client: reqwest::Client) -> Self {
        Self { matcher, client }
    }

    pub fn matcher(&self) -> &RouteRulesMatcher {
        &self.matcher
    }

    async fn proxy(&self, event: &mut Event, target: &str) -> HandlerResult {
        let mut headers = event.headers.clone();
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        let hop_by_hop: Vec<_> = headers
            .keys()
            .filter(|name| is_hop_by_hop(name.as_str()))
            .cloned()
            .collect();
        for name in hop_by_hop {
            headers.remove(name);
        }

        tracing::debug!(method = %event.method(), target = %target, "Proxying request");
        let response = self
            .client
            .request(event.method().clone(), target)
            .headers(headers)
            .body(event.body().clone())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(target = %target, error = %e, "Upstream request failed");
                HttpError::bad_gateway(format!("Failed to reach {target}"))
            })?;

        event.set_status(response.status());
        for (name, value) in response.headers() {
            if is_hop_by_hop(name.as_str()) || name == header::CONTENT_LENGTH {
                continue;
            }
            event.response.headers.append(name.clone(), value.clone());
        }

        let bytes = response.bytes().await.map_err(|e| {
            tracing::warn!(target = %target, error = %e, "Upstream body read failed");
            HttpError::bad_gateway(format!("Failed to read response from {target}"))
        })?;
        Ok(Some(Body::Bytes(bytes)))
    }
}

/// Write a redirect with a meta-refresh fallback body.
pub fn send_redirect(event: &mut Event, location: &str, status_code: u16) -> HandlerResult {
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::FOUND);
    let value = HeaderValue::from_str(location)
        .map_err(|_| HttpError::internal(format!("invalid redirect location: {location}")))?;
    event.set_status(status);
    event.response.headers.insert(header::LOCATION, value);
    event
        .response
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

    let escaped = location.replace('"', "%22");
    Ok(Some(Body::text(format!(
        "<!DOCTYPE html><html><head><meta http-equiv=\"refresh\" content=\"0; url={escaped}\"></head></html>"
    ))))
}

#[async_trait]
impl EventHandler for RouteRulesHandler {
    async fn handle(&self, event: &mut Event) -> HandlerResult {
        let rules = self.matcher.rules_for(event.path());
        if rules.is_empty() {
            return Ok(None);
        }

        for (name, value) in &rules.headers {
            event.set_response_header(name, value)?;
        }

        if let Some(redirect) = &rules.redirect {
            let target = rewrite_target(&redirect.to, redirect.strip_base.as_deref(), event.path());
            return send_redirect(event, &target, redirect.status_code);
        }

        if let Some(proxy) = &rules.proxy {
            let target = rewrite_target(&proxy.to, proxy.strip_base.as_deref(), event.path());
            return self.proxy(event, &target).await;
        }

        event.extensions.insert(rules);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn rules(toml_src: &str) -> RouteRulesMatcher {
        let rules: BTreeMap<String, RouteRules> = toml::from_str(toml_src).unwrap();
        RouteRulesMatcher::new(&rules, RouterOptions::default())
    }

    #[test]
    fn test_most_specific_rule_wins() {
        let matcher = rules(
            r#"
            ["/**"]
            headers = { "x-scope" = "root", "x-root" = "1" }

            ["/api/**"]
            headers = { "x-scope" = "api" }
            cache = { max_age = 60, swr = true }

            ["/api/users/:id"]
            cache = { max_age = 5 }
            "#,
        );

        let merged = matcher.rules_for("/api/users/7?full=1");
        assert_eq!(merged.headers.get("x-scope").map(String::as_str), Some("api"));
        assert_eq!(merged.headers.get("x-root").map(String::as_str), Some("1"));
        let cache = merged.cache.unwrap();
        assert_eq!(cache.max_age, Some(5));
        assert_eq!(cache.swr, Some(true));

        let root = matcher.rules_for("/about");
        assert_eq!(root.headers.get("x-scope").map(String::as_str), Some("root"));
        assert!(root.cache.is_none());
    }

    #[test]
    fn test_wildcard_pattern_sets_strip_base() {
        let matcher = rules(
            r#"
            ["/old/**"]
            redirect = { to = "https://example.com/new/**" }
            "#,
        );
        let merged = matcher.rules_for("/old/a/b");
        let redirect = merged.redirect.unwrap();
        assert_eq!(redirect.status_code, 307);
        assert_eq!(redirect.strip_base.as_deref(), Some("/old"));
    }

    #[test]
    fn test_rewrite_target() {
        assert_eq!(
            rewrite_target("https://example.com/new/**", Some("/old"), "/old/a/b?x=1"),
            "https://example.com/new/a/b?x=1"
        );
        assert_eq!(
            rewrite_target("http://upstream/**", None, "/api/items"),
            "http://upstream/api/items"
        );
        assert_eq!(rewrite_target("/landing", None, "/promo?ref=mail"), "/landing?ref=mail");
        assert_eq!(rewrite_target("/landing?a=1", None, "/promo?ref=mail"), "/landing?a=1&ref=mail");
        assert_eq!(rewrite_target("/landing", None, "/promo"), "/landing");
    }

    #[test]
    fn test_without_base() {
        assert_eq!(without_base("/old/a", "/old"), "/a");
        assert_eq!(without_base("/old", "/old"), "/");
        assert_eq!(without_base("/old?x=1", "/old"), "/?x=1");
        assert_eq!(without_base("/older", "/old"), "/older");
        assert_eq!(without_base("/a", ""), "/a");
    }

    #[tokio::test]
    async fn test_handler_redirects_and_sets_headers() {
        let handler = RouteRulesHandler::new(
            rules(
                r#"
                ["/docs/**"]
                headers = { "x-docs" = "yes" }
                redirect = { to = "/documentation/**", status_code = 301 }
                "#,
            ),
            reqwest::Client::new(),
        );

        let mut event = Event::new(Method::GET, "/docs/intro");
        let body = handler.handle(&mut event).await.unwrap().unwrap();
        assert_eq!(event.response.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(event.response_header("location"), Some("/documentation/intro"));
        assert_eq!(event.response_header("x-docs"), Some("yes"));
        assert!(body.to_text().contains("url=/documentation/intro"));
    }

    #[tokio::test]
    async fn test_handler_passes_through_without_rules() {
        let handler = RouteRulesHandler::new(rules(r#"["/api/**"]
headers = { "x-api" = "1" }"#), reqwest::Client::new());
        let mut event = Event::new(Method::GET, "/home");
        assert_eq!(handler.handle(&mut event).await.unwrap(), None);
        assert!(event.response.headers.is_empty());

        let mut event = Event::new(Method::GET, "/api/x");
        assert_eq!(handler.handle(&mut event).await.unwrap(), None);
        assert_eq!(event.response_header("x-api"), Some("1"));
        assert!(event.extensions.get::<RouteRules>().is_some());
    }

    #[tokio::test]
    async fn test_proxy_failure_is_bad_gateway() {
        let handler = RouteRulesHandler::new(
            rules(
                r#"
                ["/up/**"]
                proxy = { to = "http://127.0.0.1:1/**" }
                "#,
            ),
            reqwest::Client::new(),
        );
        let mut event = Event::new(Method::GET, "/up/thing");
        let error = handler.handle(&mut event).await.unwrap_err();
        assert_eq!(error.status_code(), 502);
    }
}
