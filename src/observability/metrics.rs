//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_cache_lookups_total` (counter): cache outcomes (hit, stale, miss, bypass)
//! - `gateway_cache_errors_total` (counter): soft cache failures by kind
//! - `gateway_method_fallback_scans_total` (counter): verb misses needing a scan

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Outcome of one cached-function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Stale,
    Miss,
    Bypass,
}

impl CacheOutcome {
    fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Bypass => "bypass",
        }
    }
}

pub fn record_cache_lookup(group: &str, outcome: CacheOutcome) {
    counter!(
        "gateway_cache_lookups_total",
        "group" => group.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_cache_error(kind: &'static str) {
    counter!("gateway_cache_errors_total", "kind" => kind).increment(1);
}

pub fn record_method_fallback() {
    counter!("gateway_method_fallback_scans_total").increment(1);
}
