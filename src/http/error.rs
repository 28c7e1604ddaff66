//! Structured HTTP errors and the top-level error response.
//!
//! # Responsibilities
//! - Carry a sanitized status code, status message and optional data payload
//! - Flag errors that should be logged as server incidents (`fatal`, `unhandled`)
//! - Render the JSON error body with security headers attached
//!
//! # Design Decisions
//! - Status codes outside 100..=999 fall back to the default (500)
//! - Status messages keep only tab and printable ASCII
//! - Sensitive errors never leak their message or data to clients

use axum::body::Bytes;
use axum::http::{header, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::CacheError;
use crate::http::event::{Event, Response};
use crate::security::headers::apply_security_headers;

const DEFAULT_STATUS: u16 = 500;

/// An error that unwinds to the pipeline's single error handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    status_code: u16,
    status_message: Option<String>,
    message: String,
    data: Option<Value>,
    fatal: bool,
    unhandled: bool,
}

impl HttpError {
    /// Create an error with the given status code (sanitized).
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code: sanitize_status_code(status_code, DEFAULT_STATUS),
            status_message: None,
            message: String::new(),
            data: None,
            fatal: false,
            unhandled: false,
        }
    }

    /// No route at all matched `path`.
    pub fn not_found(path: &str) -> Self {
        let path = if path.is_empty() { "/" } else { path };
        Self::new(404).with_status_message(format!("Cannot find any route matching {path}."))
    }

    /// A route matched but has no handler for `method`.
    pub fn method_not_allowed(method: &Method) -> Self {
        Self::new(405).with_status_message(format!("Method {method} is not allowed on this route."))
    }

    /// An upstream fetch failed at the network layer.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(502)
            .with_status_message("Bad Gateway")
            .with_message(message)
    }

    /// An unexpected internal failure. Logged as unhandled.
    pub fn internal(message: impl Into<String>) -> Self {
        let mut error = Self::new(500).with_message(message);
        error.unhandled = true;
        error
    }

    /// Set the status message. The message falls back to it when unset.
    pub fn with_status_message(mut self, status_message: impl Into<String>) -> Self {
        let status_message = sanitize_status_message(&status_message.into());
        if self.message.is_empty() {
            self.message = status_message.clone();
        }
        self.status_message = Some(status_message);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn unhandled(mut self) -> Self {
        self.unhandled = true;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn is_unhandled(&self) -> bool {
        self.unhandled
    }

    /// Whether this error is a server-level incident.
    pub fn is_sensitive(&self) -> bool {
        self.fatal || self.unhandled
    }

    /// Log tags in the `[unhandled] [fatal]` form.
    pub fn tags(&self) -> String {
        let mut tags = Vec::new();
        if self.unhandled {
            tags.push("[unhandled]");
        }
        if self.fatal {
            tags.push("[fatal]");
        }
        tags.join(" ")
    }
}

impl From<CacheError> for HttpError {
    fn from(error: CacheError) -> Self {
        HttpError::internal(error.to_string())
    }
}

/// Clamp a status code into 100..=999.
pub fn sanitize_status_code(code: u16, default: u16) -> u16 {
    if (100..=999).contains(&code) {
        code
    } else {
        default
    }
}

/// Drop every character except tab and printable ASCII.
pub fn sanitize_status_message(message: &str) -> String {
    message
        .chars()
        .filter(|c| *c == '\t' || (' '..='~').contains(c))
        .collect()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: bool,
    url: &'a str,
    status_code: u16,
    status_message: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

/// Render `error` for `event`.
///
/// A 404 outside of `base_url` (when it is not `/`) becomes a 302 to the
/// same path under the base URL.
pub fn error_response(error: &HttpError, event: &Event, base_url: &str) -> Response {
    let status = error.status();
    let url = event.original_url();

    if status == StatusCode::NOT_FOUND {
        if let Some(location) = base_url_redirect(base_url, url) {
            let mut response = Response::new(StatusCode::FOUND, Bytes::from_static(b"Redirecting..."));
            if let Ok(value) = HeaderValue::from_str(&location) {
                response.headers.insert(header::LOCATION, value);
            }
            return response;
        }
    }

    let sensitive = error.is_sensitive();
    let body = ErrorBody {
        error: true,
        url,
        status_code: error.status_code(),
        status_message: error.status_message().unwrap_or("Server Error"),
        message: if sensitive { "Server Error" } else { error.message() },
        data: if sensitive { None } else { error.data() },
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_default();

    let mut response = Response::new(status, Bytes::from(bytes));
    response.headers = event.response.headers.clone();
    response.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    apply_security_headers(&mut response.headers);
    if status == StatusCode::NOT_FOUND || !response.headers.contains_key(header::CACHE_CONTROL) {
        response.headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    response.headers.remove(header::CONTENT_LENGTH);
    response
}

fn base_url_redirect(base_url: &str, url: &str) -> Option<String> {
    let mut chars = base_url.chars();
    let rooted = chars.next() == Some('/') && chars.next().is_some_and(|c| c != '/');
    if !rooted {
        return None;
    }
    let (pathname, search) = match url.find('?') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };
    if pathname.starts_with(base_url) {
        return None;
    }
    let pathname = pathname.strip_prefix('/').unwrap_or(pathname);
    Some(format!("{base_url}{pathname}{search}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_sanitized() {
        assert_eq!(HttpError::new(404).status_code(), 404);
        assert_eq!(HttpError::new(42).status_code(), 500);
        assert_eq!(HttpError::new(1000).status_code(), 500);
        assert_eq!(HttpError::new(999).status_code(), 999);
    }

    #[test]
    fn test_status_message_sanitized() {
        let error = HttpError::new(400).with_status_message("Bad\r\nRequest\u{7f}\tnow é");
        assert_eq!(error.status_message(), Some("BadRequest\tnow "));
        assert_eq!(error.message(), "BadRequest\tnow ");
    }

    #[test]
    fn test_routing_messages() {
        assert_eq!(HttpError::not_found("/nope").message(), "Cannot find any route matching /nope.");
        assert_eq!(HttpError::not_found("").message(), "Cannot find any route matching /.");
        assert_eq!(
            HttpError::method_not_allowed(&Method::DELETE).message(),
            "Method DELETE is not allowed on this route."
        );
    }

    #[test]
    fn test_error_body_and_headers() {
        let event = Event::new(Method::GET, "/items?x=1");
        let error = HttpError::new(422)
            .with_status_message("Invalid")
            .with_data(serde_json::json!({"field": "name"}));
        let response = error_response(&error, &event, "/");

        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
        assert_eq!(response.header("x-frame-options"), Some("DENY"));
        assert_eq!(response.header("cache-control"), Some("no-cache"));

        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["statusCode"], 422);
        assert_eq!(body["statusMessage"], "Invalid");
        assert_eq!(body["url"], "/items?x=1");
        assert_eq!(body["data"]["field"], "name");
    }

    #[test]
    fn test_sensitive_errors_are_masked() {
        let event = Event::new(Method::GET, "/boom");
        let error = HttpError::internal("database password is hunter2").with_data(serde_json::json!(1));
        let response = error_response(&error, &event, "/");
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["message"], "Server Error");
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_base_url_redirect() {
        let event = Event::new(Method::GET, "/docs/page?q=1");
        let response = error_response(&HttpError::not_found("/docs/page"), &event, "/app/");
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/app/docs/page?q=1"));

        let inside = Event::new(Method::GET, "/app/missing");
        let response = error_response(&HttpError::not_found("/missing"), &inside, "/app/");
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
