//! Metrics collection and exposition.
//!
//! # Metrics
//! - `strata_requests_total` (counter): settled requests by method, status, view
//! - `strata_request_duration_seconds` (histogram): accept-to-settle latency
//! - `strata_transport_errors_total` (counter): response streams that failed

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(err) => tracing::error!(address = %addr, error = %err, "Failed to install Prometheus exporter"),
    }
}

pub fn record_request(method: &str, status: u16, view: &str, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    let view = view.to_string();
    ::metrics::histogram!(
        "strata_request_duration_seconds",
        "method" => method.clone(),
        "status" => status.clone(),
        "view" => view.clone()
    )
    .record(start.elapsed().as_secs_f64());
    ::metrics::counter!(
        "strata_requests_total",
        "method" => method,
        "status" => status,
        "view" => view
    )
    .increment(1);
}

pub fn record_transport_error() {
    ::metrics::counter!("strata_transport_errors_total").increment(1);
}
