//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gate_requests_total` (counter): requests by method, status
//! - `gate_request_duration_seconds` (histogram): latency distribution
//! - `gate_csrf_rejections_total` (counter): 403s from the CSRF guard
//! - `gate_csrf_tokens_issued_total` (counter): tokens minted, by reason
//! - `gate_rate_limited_total` (counter): 429s, by policy
//! - `gate_rate_limit_counters` (gauge): live counters per policy after a sweep
//! - `gate_rate_limit_swept_total` (counter): counters removed by sweeps
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gate_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gate_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_csrf_rejection() {
    counter!("gate_csrf_rejections_total").increment(1);
}

pub fn record_csrf_issued(reason: &'static str) {
    counter!("gate_csrf_tokens_issued_total", "reason" => reason).increment(1);
}

pub fn record_rate_limited(policy: &'static str) {
    counter!("gate_rate_limited_total", "policy" => policy).increment(1);
}

pub fn record_rate_limit_sweep(policy: &str, removed: usize, remaining: usize) {
    counter!("gate_rate_limit_swept_total", "policy" => policy.to_string()).increment(removed as u64);
    gauge!("gate_rate_limit_counters", "policy" => policy.to_string()).set(remaining as f64);
}
