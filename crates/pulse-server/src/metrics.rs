//! Metrics collection and export for Pulse.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_pulse_engine::EngineError;
use tracing::info;

/// Metric names.
pub mod names {
    pub const OPERATIONS_TOTAL: &str = "pulse_engine_operations_total";
    pub const OPERATION_SECONDS: &str = "pulse_engine_operation_seconds";
    pub const ERRORS_TOTAL: &str = "pulse_engine_errors_total";
    pub const CLIENTS_ACTIVE: &str = "pulse_clients_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "pulse_subscriptions_total";
    pub const PUBLICATIONS_TOTAL: &str = "pulse_publications_total";
    pub const PRESENCE_JOINS_TOTAL: &str = "pulse_presence_joins_total";
    pub const RECIPIENTS: &str = "pulse_publication_recipients";
    pub const PRESENCE_SWEPT_TOTAL: &str = "pulse_presence_swept_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::OPERATIONS_TOTAL, "Engine operations by name and outcome");
    metrics::describe_histogram!(
        names::OPERATION_SECONDS,
        "Engine operation latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Engine errors by kind");
    metrics::describe_gauge!(
        names::CLIENTS_ACTIVE,
        "Clients holding at least one subscription or presence entry"
    );
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of channel subscriptions"
    );
    metrics::describe_counter!(names::PUBLICATIONS_TOTAL, "Total number of publications");
    metrics::describe_counter!(
        names::PRESENCE_JOINS_TOTAL,
        "Presence announcements and refreshes"
    );
    metrics::describe_histogram!(names::RECIPIENTS, "Subscribers resolved per publication");
    metrics::describe_counter!(
        names::PRESENCE_SWEPT_TOTAL,
        "Presence entries removed by the sweeper"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record one engine operation.
pub fn record_operation(op: &'static str, seconds: f64, error: Option<&EngineError>) {
    let outcome = if error.is_some() { "error" } else { "ok" };
    counter!(names::OPERATIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    histogram!(names::OPERATION_SECONDS, "op" => op).record(seconds);
    if let Some(e) = error {
        counter!(names::ERRORS_TOTAL, "kind" => e.kind()).increment(1);
    }
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record a presence announcement or refresh.
pub fn record_presence_join() {
    counter!(names::PRESENCE_JOINS_TOTAL).increment(1);
}

/// Record a publication and its fan-out size.
pub fn record_publication(recipients: usize) {
    counter!(names::PUBLICATIONS_TOTAL).increment(1);
    histogram!(names::RECIPIENTS).record(recipients as f64);
}

/// Record entries removed by a presence sweep.
pub fn record_swept(count: usize) {
    counter!(names::PRESENCE_SWEPT_TOTAL).increment(count as u64);
}

/// Update the tracked client count.
pub fn set_active_clients(count: usize) {
    gauge!(names::CLIENTS_ACTIVE).set(count as f64);
}
