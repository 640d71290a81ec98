//! Admin API-key management: rotation, revocation, and listing for a
//! project's publishable/secret key pairs. Nested under
//! `/v1/admin/projects/:projectId/keys`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use silo_core::models::{ApiKey, ApiKeyType, SessionIdentity};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{project_id}/keys", get(list_keys))
        .route("/{project_id}/keys/rotate", post(rotate_key))
        .route("/{project_id}/keys/{key_id}", axum::routing::delete(revoke_key))
}

async fn list_keys(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<ApiKey>>, AppError> {
    Ok(Json(state.store.list_project_api_keys(project_id).await?))
}

#[derive(Debug, Deserialize)]
struct RotateBody {
    #[serde(rename = "type")]
    key_type: ApiKeyType,
}

#[derive(Debug, Serialize)]
struct RotateResponse {
    key: ApiKey,
    plaintext: String,
}

async fn rotate_key(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(project_id): Path<Uuid>,
    Json(body): Json<RotateBody>,
) -> Result<Json<RotateResponse>, AppError> {
    let (key, plaintext) = state.keys.rotate(project_id, body.key_type).await?;
    Ok(Json(RotateResponse { key, plaintext }))
}

async fn revoke_key(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path((_project_id, key_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.keys.revoke(key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
