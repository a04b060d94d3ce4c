//! Metrics collection and exposition.
//!
//! # Metrics
//! - `app_host_requests_total` (counter): requests served, by status
//! - `app_host_request_duration_seconds` (histogram): pipeline latency
//! - `app_host_startup_failures_total` (counter): captured startup errors
//! - `app_host_process_exits_total` (counter): self-hosted process exits, by code
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is installed by the binary only

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub fn record_request(status: u16, started: Instant) {
    counter!("app_host_requests_total", "status" => status.to_string()).increment(1);
    histogram!("app_host_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_startup_failure() {
    counter!("app_host_startup_failures_total").increment(1);
}

pub fn record_process_exit(code: Option<i32>) {
    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    counter!("app_host_process_exits_total", "code" => code).increment(1);
}

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
