//! Metrics collection and export for Cadence.
//!
//! Uses the `metrics` crate for instrumentation and optionally exports
//! to Prometheus format.

use cadence_offline::ReplayReport;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "cadence_connections_total";
    pub const DISCONNECTIONS_TOTAL: &str = "cadence_disconnections_total";
    pub const CONNECTED: &str = "cadence_connected";
    pub const RECONNECT_ATTEMPTS: &str = "cadence_reconnect_attempts";
    pub const MESSAGES_TOTAL: &str = "cadence_messages_total";
    pub const WRITES_TOTAL: &str = "cadence_writes_total";
    pub const PENDING_WRITES: &str = "cadence_pending_writes";
    pub const REPLAYED_TOTAL: &str = "cadence_replayed_total";
    pub const READS_TOTAL: &str = "cadence_reads_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Presence connections opened since start"
    );
    metrics::describe_counter!(
        names::DISCONNECTIONS_TOTAL,
        "Presence connections closed or failed since start"
    );
    metrics::describe_gauge!(names::CONNECTED, "1 while the presence channel is open");
    metrics::describe_gauge!(
        names::RECONNECT_ATTEMPTS,
        "Reconnect attempts since the last successful open"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Inbound presence messages by type");
    metrics::describe_counter!(names::WRITES_TOTAL, "Writes by outcome");
    metrics::describe_gauge!(names::PENDING_WRITES, "Writes waiting in the offline queue");
    metrics::describe_counter!(names::REPLAYED_TOTAL, "Replayed writes by outcome");
    metrics::describe_counter!(names::READS_TOTAL, "Reads by source");

    info!("Metrics initialized");
}

/// Start the Prometheus exporter.
///
/// # Errors
///
/// Returns an error if the exporter cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a presence connection transition.
pub fn record_connection_change(connected: bool, reconnect_attempts: u32) {
    if connected {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTED).set(1.0);
    } else {
        counter!(names::DISCONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTED).set(0.0);
    }
    gauge!(names::RECONNECT_ATTEMPTS).set(f64::from(reconnect_attempts));
}

/// Record an inbound message.
pub fn record_message(kind: &str) {
    counter!(names::MESSAGES_TOTAL, "type" => kind.to_string()).increment(1);
}

/// Record a write outcome.
pub fn record_write(queued: bool) {
    let outcome = if queued { "queued" } else { "delivered" };
    counter!(names::WRITES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record where a read was served from.
pub fn record_read(source: &'static str) {
    counter!(names::READS_TOTAL, "source" => source).increment(1);
}

/// Update the pending queue size.
pub fn set_pending(count: usize) {
    gauge!(names::PENDING_WRITES).set(count as f64);
}

/// Record a replay pass.
pub fn record_replay(report: &ReplayReport) {
    counter!(names::REPLAYED_TOTAL, "outcome" => "delivered").increment(report.delivered as u64);
    counter!(names::REPLAYED_TOTAL, "outcome" => "failed").increment(report.failed as u64);
    set_pending(report.remaining);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op.
        init_metrics();
        record_connection_change(true, 0);
        record_connection_change(false, 3);
        record_message("user_status");
        record_write(true);
        record_read("cache");
        record_replay(&ReplayReport {
            delivered: 2,
            failed: 1,
            remaining: 1,
            interrupted: false,
        });
    }
}
