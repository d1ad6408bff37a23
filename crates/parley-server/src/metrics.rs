//! Prometheus recorder and the metric names used across the server.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Dispatched requests (counter, labels: route).
pub const DISPATCH_REQUESTS_TOTAL: &str = "parley_dispatch_requests_total";
/// Failed dispatches (counter, labels: route, kind).
pub const DISPATCH_ERRORS_TOTAL: &str = "parley_dispatch_errors_total";
/// Dispatch latency (histogram, labels: route).
pub const DISPATCH_DURATION_SECONDS: &str = "parley_dispatch_duration_seconds";
/// Pushes that could not be enqueued (counter, labels: reason).
pub const PUSH_DROPS_TOTAL: &str = "parley_push_drops_total";
/// Pushes enqueued (counter).
pub const PUSH_SENT_TOTAL: &str = "parley_push_sent_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "parley_ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "parley_ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "parley_ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "parley_ws_connection_duration_seconds";
/// Frames that failed to decode (counter).
pub const WS_DECODE_ERRORS_TOTAL: &str = "parley_ws_decode_errors_total";

/// Install the global Prometheus recorder and describe every metric.
///
/// Call once at startup. Fails if a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe() {
    describe_counter!(DISPATCH_REQUESTS_TOTAL, "Requests dispatched, by route");
    describe_counter!(DISPATCH_ERRORS_TOTAL, "Failed dispatches, by route and error kind");
    describe_histogram!(
        DISPATCH_DURATION_SECONDS,
        Unit::Seconds,
        "Time from dispatch to response"
    );
    describe_counter!(PUSH_DROPS_TOTAL, "Pushes not enqueued, by reason");
    describe_counter!(PUSH_SENT_TOTAL, "Pushes enqueued for delivery");
    describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket connections accepted");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket connections ended");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "Open WebSocket connections");
    describe_histogram!(
        WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "WebSocket connection lifetime"
    );
    describe_counter!(WS_DECODE_ERRORS_TOTAL, "Client frames that failed to decode");
}
