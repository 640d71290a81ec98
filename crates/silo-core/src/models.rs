//! Row types for the platform metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Principal {
    Owner,
    App,
}

/// A single encrypted connection descriptor for one `(project, principal)`.
/// Never serialized to an API response — the `encrypt`/`decrypt` boundary is
/// [`crate::crypto::Crypto`], not serde.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectCredential {
    pub project_id: Uuid,
    pub principal: Principal,
    pub ciphertext: String,
    pub iv: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ApiKeyType {
    Publishable,
    Secret,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    #[sqlx(rename = "type")]
    pub kind: ApiKeyType,
    #[serde(skip)]
    pub hash: String,
    pub prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LogicalBucket {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FileMetadata {
    pub id: Uuid,
    pub project_id: Uuid,
    pub logical_bucket: String,
    pub object_key: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BackupType {
    Platform,
    Project,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BackupFormat {
    Sql,
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Backup {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    pub kind: BackupType,
    pub table_name: Option<String>,
    pub object_key: Option<String>,
    pub size_bytes: Option<i64>,
    pub format: BackupFormat,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub retention_days: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum CronJobType {
    Http,
    Platform,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CronJob {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub name: String,
    #[sqlx(rename = "type")]
    pub job_type: CronJobType,
    pub cron_expr: String,
    pub timezone: String,
    pub url: Option<String>,
    pub method: Option<String>,
    #[serde(skip)]
    pub encrypted_headers: Option<String>,
    #[serde(skip)]
    pub encrypted_headers_iv: Option<String>,
    #[serde(skip)]
    pub encrypted_body: Option<String>,
    #[serde(skip)]
    pub encrypted_body_iv: Option<String>,
    pub action: Option<String>,
    pub config: Option<serde_json::Value>,
    pub enabled: bool,
    pub timeout_ms: i64,
    pub retries: i32,
    pub retry_backoff_ms: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Fail,
    Timeout,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CronJobRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: RunStatus,
    pub http_status: Option<i32>,
    pub error_text: Option<String>,
    pub log_preview: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PlatformUser {
    pub id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct InviteKey {
    pub id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub token_hash: String,
    pub role: UserRole,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The identity an external session-authentication collaborator attaches to
/// an admin request. Modeled as a plain contract struct — there is no
/// `sessions` table here, since session auth itself is out of scope.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
}
