// ABOUTME: API module containing all HTTP handler functions for the userd REST API.
// ABOUTME: Also maps pipeline outcomes onto HTTP status codes and JSON error bodies.

pub mod stats;
pub mod stream;
pub mod users;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ulid::Ulid;
use userd_core::PipelineError;

/// Error response for API handlers. Renders as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Conflict(_) => StatusCode::CONFLICT,
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

/// Parse a path segment as a user id.
pub(crate) fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    raw.parse::<Ulid>()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid user id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_statuses() {
        let id = Ulid::new();
        let cases = [
            (PipelineError::NotFound(id), StatusCode::NOT_FOUND),
            (PipelineError::Conflict(id), StatusCode::CONFLICT),
            (PipelineError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::Transient("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("not-a-ulid").is_err());
        let id = Ulid::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
