//! Admin storage dashboard: `/v1/admin/projects/:projectId/storage/*` —
//! logical bucket listing and object browsing/deletion for operators.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use silo_core::models::{LogicalBucket, SessionIdentity};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{project_id}/storage/buckets", get(list_buckets))
        .route("/{project_id}/storage/objects", get(list_objects))
        .route("/{project_id}/storage/objects", axum::routing::delete(delete_object))
}

async fn list_buckets(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<LogicalBucket>>, AppError> {
    Ok(Json(state.store.list_buckets(project_id).await?))
}

#[derive(Debug, Deserialize)]
struct ListObjectsQuery {
    bucket: String,
    prefix: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ObjectEntry {
    key: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct ListObjectsResponse {
    objects: Vec<ObjectEntry>,
}

async fn list_objects(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(project_id): Path<Uuid>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<ListObjectsResponse>, AppError> {
    let limit = q.limit.unwrap_or(100).min(1000);
    let objects = state
        .broker
        .list(project_id, &q.bucket, q.prefix.as_deref(), limit)
        .await?
        .into_iter()
        .map(|o| ObjectEntry { key: o.key, size: o.size })
        .collect();
    Ok(Json(ListObjectsResponse { objects }))
}

#[derive(Debug, Deserialize)]
struct DeleteObjectQuery {
    #[serde(rename = "objectKey")]
    object_key: String,
}

async fn delete_object(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(project_id): Path<Uuid>,
    Query(q): Query<DeleteObjectQuery>,
) -> Result<StatusCode, AppError> {
    state.broker.delete(project_id, &q.object_key).await?;
    Ok(StatusCode::NO_CONTENT)
}
