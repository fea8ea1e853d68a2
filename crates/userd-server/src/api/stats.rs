// ABOUTME: Metrics endpoint exposing per-route Prometheus series and the persisted request count.
// ABOUTME: Renders the app state's registry in the Prometheus text exposition format.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use crate::app_state::SharedState;

/// GET /metrics - Prometheus text format metrics.
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    match state.metrics.render(state.requests.get()) {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
