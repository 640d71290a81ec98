//! Liveness probe: `GET /internal/healthz`. Unauthenticated, ungoverned by
//! the spec's Non-goal on metrics sinks — this is a process liveness check,
//! not an observability pipeline.

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
