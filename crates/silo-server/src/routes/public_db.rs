//! Public CRUD surface: `/v1/db/*`, authenticated by project API key.
//!
//! Every handler here resolves the app-tier pool via the tenant router and
//! delegates compilation to [`silo_core::crud::CrudCompiler`] — no raw SQL
//! from request input ever reaches the database.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use silo_core::crud::CrudQuery;
use silo_core::models::ApiKeyType;

use crate::error::AppError;
use crate::middleware::ApiKeyIdentity;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tables", get(list_tables))
        .route("/{table}", get(select_rows).post(insert_rows))
        .route("/{table}", axum::routing::patch(update_rows).delete(delete_rows))
}

#[derive(Debug, Serialize)]
struct TablesResponse {
    tables: HashMap<String, Vec<String>>,
}

async fn list_tables(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
) -> Result<Json<TablesResponse>, AppError> {
    let ctx = identity.0;
    let app_pool = state.router.pool(ctx.project_id, silo_core::models::Principal::App).await?;
    let tables = state.schema_cache.list_tables(ctx.project_id, &app_pool).await?;
    Ok(Json(TablesResponse { tables }))
}

fn to_pairs(params: HashMap<String, String>) -> Vec<(String, String)> {
    params.into_iter().collect()
}

#[derive(Debug, Serialize)]
struct SelectResponse {
    rows: Vec<Map<String, serde_json::Value>>,
    #[serde(rename = "rowCount")]
    row_count: usize,
}

async fn select_rows(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SelectResponse>, AppError> {
    let ctx = identity.0;
    let query = CrudQuery::parse(&to_pairs(params))?;
    let app_pool = state.router.pool(ctx.project_id, silo_core::models::Principal::App).await?;
    let max_rows_per_query = state.settings.read().await.max_rows_per_query;
    let rows = state
        .crud
        .select(ctx.project_id, &app_pool, &table, &query, max_rows_per_query)
        .await?;
    Ok(Json(SelectResponse {
        row_count: rows.len(),
        rows,
    }))
}

#[derive(Debug, Deserialize)]
struct InsertBody {
    rows: Vec<Map<String, serde_json::Value>>,
    #[serde(default)]
    #[allow(dead_code)]
    returning: bool,
}

#[derive(Debug, Serialize)]
struct InsertResponse {
    rows: Vec<Option<Map<String, serde_json::Value>>>,
    errors: Vec<Option<String>>,
}

async fn insert_rows(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Path(table): Path<String>,
    Json(body): Json<InsertBody>,
) -> Result<(StatusCode, Json<InsertResponse>), AppError> {
    let ctx = identity.0;
    require_secret(ctx.key_type)?;
    let app_pool = state.router.pool(ctx.project_id, silo_core::models::Principal::App).await?;
    let results = state
        .crud
        .insert(ctx.project_id, &app_pool, &table, &body.rows)
        .await?;

    let mut rows = Vec::with_capacity(results.len());
    let mut errors = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(row) => {
                rows.push(Some(row));
                errors.push(None);
            }
            Err(e) => {
                rows.push(None);
                errors.push(Some(e.to_string()));
            }
        }
    }
    Ok((StatusCode::CREATED, Json(InsertResponse { rows, errors })))
}

#[derive(Debug, Deserialize)]
struct MutateBody {
    values: Map<String, serde_json::Value>,
    #[serde(default)]
    #[allow(dead_code)]
    returning: bool,
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    #[serde(rename = "updatedCount")]
    updated_count: u64,
}

async fn update_rows(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<MutateBody>,
) -> Result<Json<UpdateResponse>, AppError> {
    let ctx = identity.0;
    require_secret(ctx.key_type)?;
    let query = CrudQuery::parse(&to_pairs(params))?;
    let app_pool = state.router.pool(ctx.project_id, silo_core::models::Principal::App).await?;
    let updated_count = state
        .crud
        .update(ctx.project_id, &app_pool, &table, &query, &body.values)
        .await?;
    Ok(Json(UpdateResponse { updated_count }))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    #[serde(rename = "deletedCount")]
    deleted_count: u64,
}

async fn delete_rows(
    State(state): State<AppState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DeleteResponse>, AppError> {
    let ctx = identity.0;
    require_secret(ctx.key_type)?;
    let query = CrudQuery::parse(&to_pairs(params))?;
    let app_pool = state.router.pool(ctx.project_id, silo_core::models::Principal::App).await?;
    let deleted_count = state
        .crud
        .delete(ctx.project_id, &app_pool, &table, &query)
        .await?;
    Ok(Json(DeleteResponse { deleted_count }))
}

fn require_secret(key_type: ApiKeyType) -> Result<(), AppError> {
    if key_type == ApiKeyType::Secret {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
