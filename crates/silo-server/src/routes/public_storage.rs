//! Public object-storage surface: `/v1/storage/*`, authenticated by project
//! API key. Listing requires a secret-tier key per the platform's key
//! hierarchy; upload/download presigning accepts either tier.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use silo_core::models::ApiKeyType;

use crate::error::AppError;
use crate::middleware::ApiKeyIdentity;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signed-upload", post(signed_upload))
        .route("/signed-download", get(signed_download))
        .route("/list", get(list_objects))
        .route("/object", delete(delete_object))
}

#[derive(Debug, Deserialize)]
struct SignedUploadBody {
    bucket: String,
    path: String,
    #[serde(rename = "contentType")]
    content_type: String,
    #[serde(rename = "maxSize")]
    max_size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SignedUploadResponse {
    #[serde(rename = "objectKey")]
    object_key: String,
    #[serde(rename = "uploadUrl")]
    upload_url: String,
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

async fn signed_upload(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Json(body): Json<SignedUploadBody>,
) -> Result<Json<SignedUploadResponse>, AppError> {
    let ctx = identity.0;
    let presigned = state
        .broker
        .presign_upload(
            ctx.project_id,
            &body.bucket,
            &body.path,
            &body.content_type,
            body.max_size,
        )
        .await?;
    Ok(Json(SignedUploadResponse {
        object_key: presigned.object_key,
        upload_url: presigned.url,
        expires_in: presigned.expires_in.as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
struct SignedDownloadQuery {
    bucket: String,
    #[serde(rename = "objectKey")]
    object_key: String,
}

#[derive(Debug, Serialize)]
struct SignedDownloadResponse {
    #[serde(rename = "downloadUrl")]
    download_url: String,
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

async fn signed_download(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Query(q): Query<SignedDownloadQuery>,
) -> Result<Json<SignedDownloadResponse>, AppError> {
    let ctx = identity.0;
    // `bucket` is accepted for symmetry with upload but presign_download
    // only needs the already-prefixed object key.
    let _ = &q.bucket;
    let url = state.broker.presign_download(ctx.project_id, &q.object_key).await?;
    Ok(Json(SignedDownloadResponse {
        download_url: url,
        expires_in: 15 * 60,
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
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
struct ListResponse {
    objects: Vec<ObjectEntry>,
}

async fn list_objects(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let ctx = identity.0;
    if ctx.key_type != ApiKeyType::Secret {
        return Err(AppError::Forbidden);
    }
    let limit = q.limit.unwrap_or(100).min(1000);
    let objects = state
        .broker
        .list(ctx.project_id, &q.bucket, q.prefix.as_deref(), limit)
        .await?
        .into_iter()
        .map(|o| ObjectEntry { key: o.key, size: o.size })
        .collect();
    Ok(Json(ListResponse { objects }))
}

#[derive(Debug, Deserialize)]
struct DeleteObjectQuery {
    #[serde(rename = "objectKey")]
    object_key: String,
}

async fn delete_object(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Query(q): Query<DeleteObjectQuery>,
) -> Result<StatusCode, AppError> {
    let ctx = identity.0;
    state.broker.delete(ctx.project_id, &q.object_key).await?;
    Ok(StatusCode::NO_CONTENT)
}
