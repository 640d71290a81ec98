//! Admin project lifecycle: `/v1/admin/projects/*`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use silo_core::models::{Project, SessionIdentity};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/{id}", get(get_project).delete(delete_project))
}

async fn list_projects(
    State(state): State<AppState>,
    _identity: SessionIdentity,
) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(state.store.list_projects().await?))
}

async fn get_project(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(state.store.get_project(id).await?))
}

#[derive(Debug, Deserialize)]
struct CreateProjectBody {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateProjectResponse {
    project: Project,
    #[serde(rename = "publishableKey")]
    publishable_key: String,
    #[serde(rename = "secretKey")]
    secret_key: String,
}

async fn create_project(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Json(body): Json<CreateProjectBody>,
) -> Result<(StatusCode, Json<CreateProjectResponse>), AppError> {
    let provisioned = state
        .provisioner
        .create(
            &body.name,
            body.description.as_deref(),
            &state.config.tenant_host_conn_base,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateProjectResponse {
            project: provisioned.project,
            publishable_key: provisioned.publishable_key,
            secret_key: provisioned.secret_key,
        }),
    ))
}

async fn delete_project(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.provisioner.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
