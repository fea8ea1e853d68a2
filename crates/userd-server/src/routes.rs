// ABOUTME: Route definitions for the userd HTTP API.
// ABOUTME: Assembles user, event-stream, and metrics routes into a single Axum Router with shared state.

use axum::Router;
use axum::routing::{get, put};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::SharedState;
use crate::metrics::MetricsLayer;

/// Build the complete Axum router with all routes and shared state.
pub fn create_router(state: SharedState) -> Router {
    let metrics = MetricsLayer::new(state.metrics.clone(), state.requests.clone());

    Router::new()
        .route("/health", get(health))
        .route("/users", get(api::users::list_users).post(api::users::create_user))
        .route(
            "/users/{id}",
            get(api::users::get_user)
                .put(api::users::update_user)
                .delete(api::users::delete_user),
        )
        .route("/users/{id}/status", put(api::users::deactivate_user))
        .route("/events/stream", get(api::stream::event_stream))
        .route("/metrics", get(api::stats::metrics))
        .route_layer(metrics)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler. Returns 200 OK with a simple JSON body.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppState;
    use axum::body::Body;
    use http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_returns_ok() {
        let app = create_router(Arc::new(AppState::in_memory().unwrap()));
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    /// Value of the first sample named `name` carrying every label in `labels`.
    fn sample(text: &str, name: &str, labels: &[&str]) -> Option<f64> {
        text.lines()
            .filter(|l| l.starts_with(name) && l[name.len()..].starts_with(['{', ' ']))
            .find(|l| labels.iter().all(|label| l.contains(label)))
            .and_then(|l| l.rsplit(' ').next())
            .and_then(|v| v.parse().ok())
    }

    #[tokio::test]
    async fn metrics_count_routed_requests() {
        let state = Arc::new(AppState::in_memory().unwrap());

        for _ in 0..2 {
            let resp = create_router(Arc::clone(&state))
                .oneshot(Request::get("/users").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }

        let resp = create_router(Arc::clone(&state))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        let users = ["method=\"GET\"", "route=\"/users\""];
        assert_eq!(sample(&text, "api_hits_total", &users), Some(2.0));
        assert_eq!(sample(&text, "api_errors_total", &users), Some(0.0));
        assert_eq!(sample(&text, "api_latency_seconds_count", &users), Some(2.0));
        // The metrics request itself is counted before it is served.
        assert_eq!(sample(&text, "userd_requests_total", &[]), Some(3.0));
    }
}
