//! Prometheus metrics
//!
//! Counters are recorded through the `metrics` facade by the orchestrator;
//! this module installs the exporter and serves the scrape endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Install the global Prometheus recorder.
///
/// Returns `None` if a recorder is already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe();
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

fn describe() {
    metrics::describe_counter!("phone_agent_calls_started_total", "Calls started");
    metrics::describe_counter!(
        "phone_agent_turns_completed_total",
        "Assistant turns that finished their speak phase"
    );
    metrics::describe_counter!(
        "phone_agent_finals_dropped_total",
        "Final recognition results dropped as stale or in flight"
    );
    metrics::describe_counter!(
        "phone_agent_completion_failures_total",
        "Failed completion requests"
    );
    metrics::describe_counter!(
        "phone_agent_speech_failures_total",
        "Failed synthesis or playback"
    );
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
