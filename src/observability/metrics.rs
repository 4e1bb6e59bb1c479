//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rproxy_requests_total` (counter): requests by method, status
//! - `rproxy_request_duration_seconds` (histogram): end-to-end latency
//! - `rproxy_encrypted_responses_total` (counter): bodies sent encrypted
//! - `rproxy_denied_total` (counter): policy rejections by reason
//!
//! # Design Decisions
//! - Recording is always on; without an installed recorder the `metrics`
//!   macros are no-ops
//! - The Prometheus listener is optional and runs on its own address

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::security::Decision;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("rproxy_requests_total", &labels).increment(1);
    histogram!("rproxy_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

/// Record a host policy rejection.
pub fn record_denied(decision: Decision) {
    let reason = match decision {
        Decision::Denied => "disallowed",
        Decision::NotAllowListed => "not_allowed",
        Decision::Allowed => return,
    };
    counter!("rproxy_denied_total", "reason" => reason).increment(1);
}

pub fn record_encrypted() {
    counter!("rproxy_encrypted_responses_total").increment(1);
}
