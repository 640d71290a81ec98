//! Admin SQL executor surface: `/v1/admin/projects/:projectId/sql`.
//!
//! Runs a single, denylist-checked statement against a project's owner
//! pool. Never reachable from the public API-key surface.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use silo_core::adminsql::AdminSqlResult;
use silo_core::models::{Principal, SessionIdentity};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{project_id}/sql", post(execute_sql))
}

#[derive(Debug, Deserialize)]
struct ExecuteSqlBody {
    sql: String,
}

async fn execute_sql(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(project_id): Path<Uuid>,
    Json(body): Json<ExecuteSqlBody>,
) -> Result<Json<AdminSqlResult>, AppError> {
    let owner_pool = state.router.pool(project_id, Principal::Owner).await?;
    let (max_rows_per_query, statement_timeout_ms) = {
        let settings = state.settings.read().await;
        (settings.max_rows_per_query, settings.admin_sql_statement_timeout_ms)
    };
    let result = state
        .admin_sql
        .execute(&owner_pool, &body.sql, max_rows_per_query, statement_timeout_ms)
        .await?;
    Ok(Json(result))
}
