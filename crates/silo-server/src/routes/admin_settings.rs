//! Admin runtime settings: `/v1/admin/settings` — the subset of
//! [`RuntimeSettings`] spec.md marks mutable without a restart: rate limit,
//! SQL row cap, statement timeout, and the public storage URL.

use axum::extract::State;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use silo_core::models::SessionIdentity;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_settings).patch(update_settings))
}

#[derive(Debug, Serialize)]
struct SettingsView {
    #[serde(rename = "rateLimitPerMinute")]
    rate_limit_per_minute: u32,
    #[serde(rename = "maxRowsPerQuery")]
    max_rows_per_query: i64,
    #[serde(rename = "sqlStatementTimeoutMs")]
    sql_statement_timeout_ms: i64,
    #[serde(rename = "publicStorageUrl")]
    public_storage_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SettingsPatch {
    #[serde(rename = "rateLimitPerMinute")]
    rate_limit_per_minute: Option<u32>,
    #[serde(rename = "maxRowsPerQuery")]
    max_rows_per_query: Option<i64>,
    #[serde(rename = "sqlStatementTimeoutMs")]
    sql_statement_timeout_ms: Option<i64>,
    #[serde(rename = "publicStorageUrl")]
    public_storage_url: Option<Option<String>>,
}

async fn get_settings(
    State(state): State<AppState>,
    _identity: SessionIdentity,
) -> Result<Json<SettingsView>, AppError> {
    let settings = state.settings.read().await;
    Ok(Json(SettingsView {
        rate_limit_per_minute: settings.rate_limit_per_minute,
        max_rows_per_query: settings.max_rows_per_query,
        sql_statement_timeout_ms: settings.admin_sql_statement_timeout_ms,
        public_storage_url: settings.public_storage_url.clone(),
    }))
}

async fn update_settings(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<SettingsView>, AppError> {
    let mut settings = state.settings.write().await;
    if let Some(v) = patch.rate_limit_per_minute {
        settings.rate_limit_per_minute = v;
    }
    if let Some(v) = patch.max_rows_per_query {
        settings.max_rows_per_query = v;
    }
    if let Some(v) = patch.sql_statement_timeout_ms {
        settings.admin_sql_statement_timeout_ms = v;
    }
    if let Some(v) = patch.public_storage_url {
        settings.public_storage_url = v;
    }
    Ok(Json(SettingsView {
        rate_limit_per_minute: settings.rate_limit_per_minute,
        max_rows_per_query: settings.max_rows_per_query,
        sql_statement_timeout_ms: settings.admin_sql_statement_timeout_ms,
        public_storage_url: settings.public_storage_url.clone(),
    }))
}
