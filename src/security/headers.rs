//! Security and hop-by-hop header handling.
//!
//! # Responsibilities
//! - Add hardening headers to error responses
//! - Identify hop-by-hop headers that must not cross a proxy
//!
//! # Design Decisions
//! - Existing values are overwritten: an error response is never framed or sniffed

use axum::http::{header, HeaderMap, HeaderValue};

const CONTENT_SECURITY_POLICY: &str = "script-src 'none'; frame-ancestors 'none';";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Attach the hardening headers sent with every error response.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
}

/// Whether `name` (lowercase) is a connection-scoped header.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name)
}
