//! Admin platform users and invite keys: `/v1/admin/users/*`,
//! `/v1/admin/invites/*`. Session auth itself is out of scope; these routes
//! only manage the `platform_users`/`invite_keys` rows the external
//! session-authentication collaborator is expected to read.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use silo_core::crypto::{generate_invite_token, hash_hex};
use silo_core::models::{InviteKey, PlatformUser, SessionIdentity, UserRole};

use crate::error::AppError;
use crate::state::AppState;

const INVITE_TTL_DAYS: i64 = 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/invites", post(create_invite))
}

async fn list_users(
    State(state): State<AppState>,
    _identity: SessionIdentity,
) -> Result<Json<Vec<PlatformUser>>, AppError> {
    Ok(Json(state.store.list_users().await?))
}

#[derive(Debug, Deserialize)]
struct CreateInviteBody {
    email: String,
    role: UserRole,
}

#[derive(Debug, Serialize)]
struct CreateInviteResponse {
    invite: InviteKey,
    token: String,
}

async fn create_invite(
    State(state): State<AppState>,
    _identity: SessionIdentity,
    Json(body): Json<CreateInviteBody>,
) -> Result<(StatusCode, Json<CreateInviteResponse>), AppError> {
    let token = generate_invite_token();
    let token_hash = hash_hex(&token);
    let expires_at = Utc::now() + ChronoDuration::days(INVITE_TTL_DAYS);
    let invite = state
        .store
        .insert_invite(Uuid::new_v4(), &body.email, &token_hash, body.role, expires_at)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateInviteResponse { invite, token })))
}
