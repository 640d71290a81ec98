//! Admin backup CRUD, restore, and retention: `/v1/admin/backups/*`.
//!
//! Creation kicks off the dump asynchronously and returns immediately with
//! the `pending` row — completion is observed by polling `GET /:id`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use silo_core::models::{Backup, BackupFormat, BackupType, SessionIdentity};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/{id}", get(get_backup))
        .route("/{id}/restore", post(restore_backup))
        .route("/retention/sweep", post(sweep_retention))
}

#[derive(Debug, Deserialize)]
struct ListBackupsQuery {
    #[serde(rename = "projectId")]
    project_id: Option<Uuid>,
}

async fn list_backups(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Query(q): Query<ListBackupsQuery>,
) -> Result<Json<Vec<Backup>>, AppError> {
    Ok(Json(state.store.list_backups(q.project_id).await?))
}

async fn get_backup(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Backup>, AppError> {
    Ok(Json(state.store.get_backup(id).await?))
}

#[derive(Debug, Deserialize)]
struct CreateBackupBody {
    #[serde(rename = "backupType")]
    backup_type: BackupType,
    #[serde(rename = "projectId")]
    project_id: Option<Uuid>,
    #[serde(rename = "tableName")]
    table_name: Option<String>,
    #[serde(default = "default_format")]
    format: BackupFormat,
    #[serde(rename = "retentionDays")]
    retention_days: Option<i32>,
}

fn default_format() -> BackupFormat {
    BackupFormat::Sql
}

async fn create_backup(
    State(state): State<AppState>,
    identity: SessionIdentity,
    Json(body): Json<CreateBackupBody>,
) -> Result<(StatusCode, Json<Backup>), AppError> {
    let backup = state
        .backups
        .create(
            body.backup_type,
            body.project_id,
            body.table_name.as_deref(),
            body.format,
            body.retention_days,
            Some(identity.user_id),
        )
        .await?;

    let backups = state.backups.clone();
    let backup_id = backup.id;
    tokio::spawn(async move {
        if let Err(err) = backups.run(backup_id).await {
            tracing::warn!(%backup_id, error = %err, "backup task exited with an error");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(backup)))
}

#[derive(Debug, Serialize)]
struct RestoreResponse {
    success: bool,
    warnings: Vec<String>,
}

async fn restore_backup(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<RestoreResponse>, AppError> {
    let outcome = state.backups.restore(id).await?;
    Ok(Json(RestoreResponse {
        success: outcome.success,
        warnings: outcome.warnings,
    }))
}

#[derive(Debug, Deserialize)]
struct SweepQuery {
    #[serde(rename = "projectId")]
    project_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct SweepResponse {
    #[serde(rename = "deletedCount")]
    deleted_count: u64,
}

async fn sweep_retention(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Query(q): Query<SweepQuery>,
) -> Result<Json<SweepResponse>, AppError> {
    let deleted_count = if let Some(project_id) = q.project_id {
        state.backups.cleanup_with_retention(project_id).await?
    } else {
        state.backups.cleanup_expired().await?
    };
    Ok(Json(SweepResponse { deleted_count }))
}
