// ABOUTME: User CRUD API handlers mapping HTTP verbs onto the six pipeline operations.
// ABOUTME: Bodies and responses use the flat Record shape; errors come back as JSON.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use userd_core::{NewUser, Record, UserPatch};

use super::{ApiError, parse_id};
use crate::app_state::SharedState;

/// POST /users - Create a user.
pub async fn create_user(
    State(state): State<SharedState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let record = state.pipeline.create(req).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /users - List every user straight from the store.
pub async fn list_users(State(state): State<SharedState>) -> Result<Json<Vec<Record>>, ApiError> {
    Ok(Json(state.pipeline.list().await?))
}

/// GET /users/{id} - Read one user through the cache.
pub async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.pipeline.read(id).await?))
}

/// PUT /users/{id} - Update name and/or email.
pub async fn update_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<Record>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.pipeline.update(id, patch).await?))
}

/// DELETE /users/{id} - Hard-delete a user.
pub async fn delete_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.pipeline.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /users/{id}/status - Mark a user inactive.
pub async fn deactivate_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.pipeline.deactivate(id).await?))
}
