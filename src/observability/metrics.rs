//! Metrics collection and exposition.
//!
//! # Metrics
//! - `idempotency_requests_total` (counter): requests by method, status, outcome
//! - `idempotency_request_duration_seconds` (histogram): end-to-end latency
//! - `idempotency_cache_lookups_total` (counter): hit, miss, conflict
//! - `idempotency_flight_joins_total` (counter): leader or follower
//! - `idempotency_origin_calls_total` (counter): origin status or failure kind
//! - `idempotency_store_errors_total` (counter): failed store operations
//! - `idempotency_store_entries` (gauge): entries held by the in-memory store

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

fn describe() {
    describe_counter!("idempotency_requests_total", "Inbound requests handled");
    describe_histogram!(
        "idempotency_request_duration_seconds",
        "End-to-end request latency"
    );
    describe_counter!("idempotency_cache_lookups_total", "Cache lookups by result");
    describe_counter!("idempotency_flight_joins_total", "Single-flight joins by role");
    describe_counter!("idempotency_origin_calls_total", "Origin calls by result");
    describe_counter!("idempotency_store_errors_total", "Failed store operations");
    describe_gauge!("idempotency_store_entries", "Entries held by the in-memory store");
}

/// Record a finished inbound request.
pub fn record_request(method: &str, status: u16, outcome: &'static str, start: Instant) {
    counter!(
        "idempotency_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("idempotency_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// `result` is one of `hit`, `miss`, `conflict`.
pub fn record_cache_lookup(result: &'static str) {
    counter!("idempotency_cache_lookups_total", "result" => result).increment(1);
}

/// `role` is `leader` or `follower`.
pub fn record_flight(role: &'static str) {
    counter!("idempotency_flight_joins_total", "role" => role).increment(1);
}

/// `result` is the status code, `timeout` or `error`.
pub fn record_origin_call(result: String) {
    counter!("idempotency_origin_calls_total", "result" => result).increment(1);
}

pub fn record_store_error(op: &'static str) {
    counter!("idempotency_store_errors_total", "op" => op).increment(1);
}

pub fn record_store_entries(entries: usize) {
    gauge!("idempotency_store_entries").set(entries as f64);
}
