//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_requests_total` (counter): calls by method and status code
//! - `rpc_request_duration_seconds` (histogram): call latency
//! - `rpc_retries_total` (counter): retry attempts by method and code
//! - `mesh_endpoint_health` (gauge): 1=healthy, 0=unhealthy, per address

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tonic::Code;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed call.
pub fn record_call(method: &str, code: Code, elapsed: Duration) {
    let code = format!("{code:?}");
    metrics::counter!("rpc_requests_total", "method" => method.to_owned(), "code" => code)
        .increment(1);
    metrics::histogram!("rpc_request_duration_seconds", "method" => method.to_owned())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(method: &str, code: Code) {
    metrics::counter!(
        "rpc_retries_total",
        "method" => method.to_owned(),
        "code" => format!("{code:?}")
    )
    .increment(1);
}

pub fn record_endpoint_health(address: &str, healthy: bool) {
    metrics::gauge!("mesh_endpoint_health", "address" => address.to_owned())
        .set(if healthy { 1.0 } else { 0.0 });
}
