//! Metrics collection and export for Agora.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use agora_core::HubStats;
use agora_transport::ConnectionOutcome;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "agora_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "agora_connections_active";
    pub const ADMISSIONS_TOTAL: &str = "agora_admissions_total";
    pub const HUB_MEMBERS: &str = "agora_hub_members";
    pub const EVICTIONS_TOTAL: &str = "agora_evictions_total";
    pub const ERRORS_TOTAL: &str = "agora_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of upgraded sockets since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open sockets"
    );
    metrics::describe_counter!(
        names::ADMISSIONS_TOTAL,
        "Admission attempts by outcome"
    );
    metrics::describe_gauge!(names::HUB_MEMBERS, "Current number of hub members");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Slow consumers evicted by the hub"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record how a served connection ended its admission.
pub fn record_outcome(outcome: &ConnectionOutcome) {
    let label = match outcome {
        ConnectionOutcome::Closed => "admitted",
        ConnectionOutcome::Rejected(agora_core::Rejection::CapacityExceeded) => "capacity",
        ConnectionOutcome::Rejected(agora_core::Rejection::DuplicateName) => "duplicate_name",
        ConnectionOutcome::InvalidName(_) => "invalid_name",
        ConnectionOutcome::HubUnavailable => {
            record_error("hub_unavailable");
            "hub_unavailable"
        }
    };
    counter!(names::ADMISSIONS_TOTAL, "outcome" => label).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Mirror hub stats into gauges until the hub stops.
pub async fn track_hub(mut stats: watch::Receiver<HubStats>) {
    let mut evictions = 0;
    loop {
        let current = *stats.borrow_and_update();
        gauge!(names::HUB_MEMBERS).set(current.members as f64);
        counter!(names::EVICTIONS_TOTAL).increment(current.evictions.saturating_sub(evictions));
        evictions = current.evictions;

        if stats.changed().await.is_err() {
            break;
        }
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Hub, HubConfig};

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; only checks it doesn't panic
        let _guard = ConnectionMetricsGuard::new();
        record_outcome(&ConnectionOutcome::HubUnavailable);
    }

    #[tokio::test]
    async fn test_track_hub_ends_with_hub() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let tracker = tokio::spawn(track_hub(handle.watch_stats()));

        drop(hub);
        tracker.await.unwrap();
    }
}
