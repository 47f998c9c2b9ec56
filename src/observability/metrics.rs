//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_responses_total` (counter): responses written, by status
//! - `gateway_connections_active` (gauge): live client connections
//! - `gateway_backend_connected` (gauge): 1=connected, 0=not
//! - `gateway_backend_reconnects_total` (counter): reconnect attempts
//!
//! Recording is always on and costs nothing without an installed recorder;
//! the Prometheus endpoint is opt-in.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_response(status: u16) {
    counter!("gateway_responses_total", "status" => status.to_string()).increment(1);
}

pub fn connection_opened() {
    gauge!("gateway_connections_active").increment(1.0);
}

pub fn connection_closed() {
    gauge!("gateway_connections_active").decrement(1.0);
}

pub fn backend_connected(connected: bool) {
    gauge!("gateway_backend_connected").set(if connected { 1.0 } else { 0.0 });
}

pub fn backend_reconnect() {
    counter!("gateway_backend_reconnects_total").increment(1);
}
