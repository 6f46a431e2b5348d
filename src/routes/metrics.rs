//! Prometheus metrics endpoint
//!
//! Exposes relay metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "relay_requests_total",
        "Relayed chat completion requests by outcome"
    );
    metrics::describe_counter!(
        "relay_tokens_total",
        "Tokens accounted, by direction"
    );
    metrics::describe_counter!(
        "relay_upstream_attempts_total",
        "Upstream call attempts by result"
    );
    metrics::describe_histogram!(
        "relay_request_duration_seconds",
        "Relay duration in seconds"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a finished relay
pub fn record_request(outcome: &str, model: &str, streaming: bool, duration_secs: f64) {
    metrics::counter!(
        "relay_requests_total",
        "outcome" => outcome.to_string(),
        "model" => model.to_string(),
        "streaming" => streaming.to_string()
    )
    .increment(1);
    metrics::histogram!("relay_request_duration_seconds", "model" => model.to_string())
        .record(duration_secs);
}

/// Record accounted tokens
pub fn record_tokens(direction: &str, count: u64, model: &str) {
    metrics::counter!(
        "relay_tokens_total",
        "direction" => direction.to_string(),
        "model" => model.to_string()
    )
    .increment(count);
}

/// Record one upstream attempt
pub fn record_upstream_attempt(provider: &str, result: &str) {
    metrics::counter!(
        "relay_upstream_attempts_total",
        "provider" => provider.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}
