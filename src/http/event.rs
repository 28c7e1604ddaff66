//! Request/response model seen by handlers.
//!
//! # Responsibilities
//! - Hold the request as seen by the current layer (path rewritten per layer)
//! - Accumulate the response (status, headers, body) written by handlers
//! - Track whether a handler already wrote the response itself
//!
//! # Design Decisions
//! - Transport-agnostic: the axum server converts to/from this model
//! - The original URL is preserved for logging and cache keys

use std::borrow::Cow;

use axum::body::{Body as AxumBody, Bytes};
use axum::http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::Value;

use crate::http::error::HttpError;
use crate::routing::Params;

/// A response body returned by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Text(String),
    Json(Value),
    Bytes(Bytes),
}

impl Body {
    pub fn text(text: impl Into<String>) -> Self {
        Body::Text(text.into())
    }

    /// Serialize `value` as a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, HttpError> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(|e| HttpError::internal(format!("failed to serialize response: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(text) => text.is_empty(),
            Body::Json(_) => false,
            Body::Bytes(bytes) => bytes.is_empty(),
        }
    }

    /// Default content type for this body kind.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Body::Empty => None,
            Body::Text(_) => Some("text/plain; charset=utf-8"),
            Body::Json(_) => Some("application/json"),
            Body::Bytes(_) => Some("application/octet-stream"),
        }
    }

    /// Textual rendering; binary bodies are decoded lossily.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Body::Empty => Cow::Borrowed(""),
            Body::Text(text) => Cow::Borrowed(text),
            Body::Json(value) => Cow::Owned(value.to_string()),
            Body::Bytes(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Text(text) => Bytes::from(text),
            Body::Json(value) => Bytes::from(value.to_string()),
            Body::Bytes(bytes) => bytes,
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

/// Response accumulated on an [`Event`].
#[derive(Debug, Clone)]
pub struct ResponseState {
    pub status: StatusCode,
    pub status_text: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    handled: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            status_text: None,
            headers: HeaderMap::new(),
            body: None,
            handled: false,
        }
    }
}

/// One in-flight request.
#[derive(Debug)]
pub struct Event {
    method: Method,
    path: String,
    original_url: String,
    pub headers: HeaderMap,
    body: Bytes,
    /// Parameters bound by the method router.
    pub params: Params,
    /// Pattern of the route that matched, if any.
    pub matched_route: Option<String>,
    /// Request-scoped typed context.
    pub extensions: Extensions,
    pub response: ResponseState,
}

impl Event {
    /// Create an event for `url` (path plus optional query).
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let mut url = url.into();
        if !url.starts_with('/') {
            url.insert(0, '/');
        }
        Self {
            method,
            path: url.clone(),
            original_url: url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: Params::new(),
            matched_route: None,
            extensions: Extensions::new(),
            response: ResponseState::default(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Add a request header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path (with query) as seen by the current layer.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current path without the query string.
    pub fn pathname(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(path, _)| path)
    }

    /// URL as received, before any layer rewrote it.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn set_response_header(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| HttpError::internal(format!("invalid response header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| HttpError::internal(format!("invalid value for response header {name}")))?;
        self.response.headers.insert(name, value);
        Ok(())
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Write the response directly and mark the event handled.
    pub fn send(&mut self, body: Body) {
        self.finalize(body);
        self.response.handled = true;
    }

    /// Mark the response as written without a body.
    pub fn mark_handled(&mut self) {
        self.response.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.response.handled
    }

    /// Store the final body, defaulting the content type from its kind.
    pub fn finalize(&mut self, body: Body) {
        if !self.response.headers.contains_key(header::CONTENT_TYPE) {
            if let Some(content_type) = body.content_type() {
                self.response
                    .headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        self.response.body = Some(body);
    }

    /// A copy of the request with a fresh response, for capturing output.
    /// Request-scoped extensions carry over.
    pub fn fork(&self) -> Event {
        Event {
            method: self.method.clone(),
            path: self.path.clone(),
            original_url: self.original_url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            params: self.params.clone(),
            matched_route: self.matched_route.clone(),
            extensions: self.extensions.clone(),
            response: ResponseState::default(),
        }
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(
            self.response.status,
            self.response.body.map(Body::into_bytes).unwrap_or_default(),
        );
        response.headers = self.response.headers;
        if self.method == Method::HEAD {
            response.body = Bytes::new();
        }
        response
    }
}

/// A finished response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(AxumBody::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pathname_strips_query() {
        let event = Event::new(Method::GET, "/search?q=rust");
        assert_eq!(event.path(), "/search?q=rust");
        assert_eq!(event.pathname(), "/search");
        assert_eq!(Event::new(Method::GET, "items").path(), "/items");
    }

    #[test]
    fn test_finalize_sets_default_content_type() {
        let mut event = Event::new(Method::GET, "/");
        event.finalize(Body::json(&serde_json::json!({"ok": true})).unwrap());
        assert_eq!(event.response_header("content-type"), Some("application/json"));

        let mut event = Event::new(Method::GET, "/");
        event.set_response_header("content-type", "text/html").unwrap();
        event.finalize(Body::text("<p>hi</p>"));
        assert_eq!(event.response_header("content-type"), Some("text/html"));
    }

    #[test]
    fn test_fork_keeps_request_and_resets_response() {
        #[derive(Debug, Clone, PartialEq)]
        struct Tenant(&'static str);

        let mut event = Event::new(Method::GET, "/a?b=1").with_header("accept", "text/html");
        event.extensions.insert(Tenant("acme"));
        event.set_status(StatusCode::CREATED);
        event.send(Body::text("done"));

        let fork = event.fork();
        assert_eq!(fork.original_url(), "/a?b=1");
        assert_eq!(fork.header("accept"), Some("text/html"));
        assert_eq!(fork.extensions.get::<Tenant>(), Some(&Tenant("acme")));
        assert_eq!(fork.response.status, StatusCode::OK);
        assert!(!fork.is_handled());
    }

    #[test]
    fn test_head_response_has_no_body() {
        let mut event = Event::new(Method::HEAD, "/");
        event.send(Body::text("hello"));
        let response = event.into_response();
        assert!(response.body.is_empty());
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_invalid_response_header_is_an_error() {
        let mut event = Event::new(Method::GET, "/");
        assert!(event.set_response_header("bad header", "x").is_err());
        assert!(event.set_response_header("x-ok", "line\nbreak").is_err());
    }
}
