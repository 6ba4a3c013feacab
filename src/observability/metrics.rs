//! Metrics collection and exposition.
//!
//! # Metrics
//! - `render_requests_total` (counter): requests by method, status, handler
//! - `render_request_duration_seconds` (histogram): latency distribution
//! - `render_worker_pending` (gauge): dev worker renders in flight
//! - `render_build_tasks_total` (counter): build tasks written, by kind
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library code and
//!   tests call these freely
//! - Labels are low-cardinality: no pathnames

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

/// Record one finished request.
pub fn record_request(method: &str, status: u16, handler: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("handler", handler.to_string()),
    ];
    counter!("render_requests_total", &labels).increment(1);
    histogram!("render_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

/// Current number of dev worker renders awaiting a terminal frame.
pub fn record_worker_pending(pending: usize) {
    gauge!("render_worker_pending").set(pending as f64);
}

pub fn record_build_task(kind: &'static str) {
    counter!("render_build_tasks_total", "kind" => kind).increment(1);
}
