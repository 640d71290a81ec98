//! Admin stats: `GET /v1/admin/stats` — aggregate project/backup/job
//! counts. Named in spec.md's admin surface but left unspecified in detail;
//! implemented as simple counts over the metadata store.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use silo_core::models::SessionIdentity;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(stats))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(rename = "projectCount")]
    project_count: usize,
    #[serde(rename = "backupCount")]
    backup_count: usize,
    #[serde(rename = "activeJobCount")]
    active_job_count: usize,
}

async fn stats(
    State(state): State<AppState>,
    _identity: SessionIdentity,
) -> Result<Json<StatsResponse>, AppError> {
    let project_count = state.store.list_project_ids().await?.len();
    let backup_count = state.store.list_backups(None).await?.len();
    let active_job_count = state.scheduler.active_job_ids().await.len();
    Ok(Json(StatsResponse {
        project_count,
        backup_count,
        active_job_count,
    }))
}
