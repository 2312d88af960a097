//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::{Hub, SessionSummary, CONNECT, DISCONNECT};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const FRAMES_TOTAL: &str = "relay_frames_total";
    pub const PROTOCOL_ERRORS_TOTAL: &str = "relay_protocol_errors_total";
    pub const BROADCAST_RECIPIENTS_TOTAL: &str = "relay_broadcast_recipients_total";
    pub const HANDLER_ERRORS_TOTAL: &str = "relay_handler_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of text frames");
    metrics::describe_counter!(
        names::PROTOCOL_ERRORS_TOTAL,
        "Error envelopes sent to clients"
    );
    metrics::describe_counter!(
        names::BROADCAST_RECIPIENTS_TOTAL,
        "Recipients reached by client publishes"
    );
    metrics::describe_counter!(
        names::HANDLER_ERRORS_TOTAL,
        "Event handler failures"
    );

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

/// Track connection counts through the hub's lifecycle events.
pub fn register_hooks(hub: &Hub) {
    hub.on(CONNECT, |_| async {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Ok(())
    });

    hub.on(DISCONNECT, |_| async {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
        Ok(())
    });
}

/// Record the traffic of a finished session.
pub fn record_session(summary: &SessionSummary) {
    counter!(names::FRAMES_TOTAL, "direction" => "inbound").increment(summary.frames_received);
    counter!(names::FRAMES_TOTAL, "direction" => "outbound").increment(summary.replies_sent);
    for (kind, count) in summary.protocol_errors.by_kind() {
        if count > 0 {
            counter!(names::PROTOCOL_ERRORS_TOTAL, "kind" => kind).increment(count);
        }
    }
    counter!(names::BROADCAST_RECIPIENTS_TOTAL).increment(summary.published_to);
    counter!(names::HANDLER_ERRORS_TOTAL).increment(summary.handler_errors);
}
