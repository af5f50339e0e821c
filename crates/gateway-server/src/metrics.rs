//! Metrics collection and export for the gateway.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use gateway_core::{HubHandle, HubStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "gateway_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";
    pub const MEMBERS: &str = "gateway_members";
    pub const BROADCASTS_TOTAL: &str = "gateway_broadcasts_total";
    pub const DELIVERIES_TOTAL: &str = "gateway_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "gateway_evictions_total";
    pub const ERRORS_TOTAL: &str = "gateway_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of upgraded connections"
    );
    metrics::describe_gauge!(names::MEMBERS, "Connections registered with the hub");
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Broadcasts processed by the hub");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Messages accepted by connection mailboxes"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections evicted for backpressure"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Publish a hub statistics snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::MEMBERS).set(stats.members as f64);
    counter!(names::BROADCASTS_TOTAL).absolute(stats.broadcasts);
    counter!(names::DELIVERIES_TOTAL).absolute(stats.deliveries);
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evictions);
}

/// Periodically copy hub statistics into the metrics registry.
///
/// Stops when the hub stops.
pub fn spawn_hub_reporter(hub: HubHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match hub.stats().await {
                Ok(stats) => record_hub_stats(&stats),
                Err(_) => {
                    debug!("Hub stopped, metrics reporter exiting");
                    break;
                }
            }
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
