// ABOUTME: HTTP server for userd, exposing the user record pipeline as a REST API with SSE event streaming.
// ABOUTME: Uses Axum with shared state holding the injected pipeline, event feed, and request metrics.

pub mod api;
pub mod app_state;
pub mod config;
pub mod metrics;
pub mod routes;

pub use app_state::{AppState, BootstrapError, SharedState};
pub use config::{ConfigError, StoreKind, UserdConfig};
pub use routes::create_router;
