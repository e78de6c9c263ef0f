//! Prometheus metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;
use crate::ServerError;

/// Install the global recorder
///
/// Must be called once at startup, before anything records.
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Internal(format!("failed to install Prometheus recorder: {}", e)))?;

    register_default_metrics();
    Ok(handle)
}

/// Pre-register series so they show up before the first event
fn register_default_metrics() {
    gauge!("parley_sessions_active").set(0.0);
    counter!("parley_sessions_created_total").absolute(0);
    gauge!("parley_limiter_outstanding").set(0.0);

    for outcome in ["completed", "superseded", "failed"] {
        counter!("parley_responses_total", "outcome" => outcome).absolute(0);
    }
    for kind in ["synthesis", "upstream", "tool", "rate_limited", "invalid_input"] {
        counter!("parley_errors_total", "type" => kind).absolute(0);
    }
    histogram!("parley_synthesis_seconds").record(0.0);
}

pub fn record_session_created() {
    counter!("parley_sessions_created_total").increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("parley_sessions_active").set(count as f64);
}

/// Count a request rejected before any response started
pub fn record_rejected(kind: &'static str) {
    counter!("parley_errors_total", "type" => kind).increment(1);
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.registry.count());

    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics disabled".to_string(),
        ),
    }
}
