//! Typed accessors for the control-plane (platform) database.
//!
//! Every multi-row invariant (project deletion cascading through its
//! dependent tables, key rotation) goes through [`Store::transaction`]. DDL
//! (`CREATE DATABASE`, `CREATE ROLE`, ...) must never run inside a
//! transaction block — those statements go through [`Store::execute_ddl`],
//! which borrows the raw pool and refuses to be called from within one.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    ApiKey, ApiKeyType, AuditEntry, Backup, BackupFormat, BackupStatus, BackupType, CronJob,
    CronJobRun, CronJobType, FileMetadata, InviteKey, LogicalBucket, PlatformUser, Principal,
    Project, ProjectCredential, RunStatus, UserRole,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("unique constraint violated: {detail}")]
    Conflict { detail: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn classify(err: sqlx::Error) -> StoreError {
    if matches!(err, sqlx::Error::RowNotFound) {
        return StoreError::NotFound;
    }
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict {
                detail: db_err.message().to_owned(),
            };
        }
    }
    StoreError::Database(err)
}

/// Handle to the platform database. Thin wrapper over `PgPool` — cheap to
/// clone, safe to share across tasks.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction. Callers are expected to thread the returned
    /// handle through the per-row helpers below and finish with
    /// [`Store::commit`] or an explicit rollback; this is the only sanctioned
    /// way to coordinate multi-row invariants (e.g. project deletion cascading
    /// through its dependent tables).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if `BEGIN` fails.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(classify)
    }

    /// Commit a transaction started with [`Store::begin`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if `COMMIT` fails.
    pub async fn commit(&self, tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
        tx.commit().await.map_err(classify)
    }

    /// Run a DDL statement (`CREATE DATABASE`, `CREATE ROLE`, `DROP
    /// DATABASE`, `DROP ROLE`, ...) directly on the pool, bypassing any
    /// transaction. Postgres cannot run `CREATE DATABASE`/`DROP DATABASE`
    /// inside a transaction block; other DDL is kept here too for symmetry
    /// with the provisioning algorithm that drives it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the statement fails.
    pub async fn execute_ddl(&self, sql: &str) -> Result<(), StoreError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    // ---- projects ----------------------------------------------------

    pub async fn insert_project(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        name: &str,
        slug: &str,
        description: Option<&str>,
    ) -> Result<Project, StoreError> {
        sqlx::query_as::<_, Project>(
            "INSERT INTO projects (id, name, slug, description, created_at, updated_at)
             VALUES ($1, $2, $3, $4, now(), now())
             RETURNING id, name, slug, description, created_at, updated_at",
        )
        .bind(id)
        .bind(name)
        .bind(slug)
        .bind(description)
        .fetch_one(&mut **tx)
        .await
        .map_err(classify)
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project, StoreError> {
        sqlx::query_as::<_, Project>(
            "SELECT id, name, slug, description, created_at, updated_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        sqlx::query_as::<_, Project>(
            "SELECT id, name, slug, description, created_at, updated_at FROM projects ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn delete_project_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM file_metadata WHERE project_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM buckets WHERE project_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM api_keys WHERE project_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM project_db_creds WHERE project_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM audit_logs WHERE project_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;
        Ok(())
    }

    // ---- credentials ---------------------------------------------------

    pub async fn insert_credential(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        project_id: Uuid,
        principal: Principal,
        ciphertext: &str,
        iv: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO project_db_creds (project_id, principal, ciphertext, iv, created_at)
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(project_id)
        .bind(principal)
        .bind(ciphertext)
        .bind(iv)
        .execute(&mut **tx)
        .await
        .map_err(classify)?;
        Ok(())
    }

    pub async fn get_credential(
        &self,
        project_id: Uuid,
        principal: Principal,
    ) -> Result<ProjectCredential, StoreError> {
        sqlx::query_as::<_, ProjectCredential>(
            "SELECT project_id, principal, ciphertext, iv, created_at
             FROM project_db_creds WHERE project_id = $1 AND principal = $2",
        )
        .bind(project_id)
        .bind(principal)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    // ---- api keys --------------------------------------------------------

    pub async fn insert_api_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        project_id: Uuid,
        kind: ApiKeyType,
        hash: &str,
        prefix: &str,
    ) -> Result<ApiKey, StoreError> {
        sqlx::query_as::<_, ApiKey>(
            "INSERT INTO api_keys (id, project_id, type, hash, prefix, created_at)
             VALUES ($1, $2, $3, $4, $5, now())
             RETURNING id, project_id, type, hash, prefix, created_at, expires_at, revoked_at",
        )
        .bind(id)
        .bind(project_id)
        .bind(kind)
        .bind(hash)
        .bind(prefix)
        .fetch_one(&mut **tx)
        .await
        .map_err(classify)
    }

    /// All active keys across all projects, for [`crate::keys::KeyService::validate`]'s
    /// constant-time linear scan.
    pub async fn list_active_api_keys(&self) -> Result<Vec<ApiKey>, StoreError> {
        sqlx::query_as::<_, ApiKey>(
            "SELECT id, project_id, type, hash, prefix, created_at, expires_at, revoked_at
             FROM api_keys
             WHERE revoked_at IS NULL AND (expires_at IS NULL OR expires_at > now())",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn list_project_api_keys(&self, project_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        sqlx::query_as::<_, ApiKey>(
            "SELECT id, project_id, type, hash, prefix, created_at, expires_at, revoked_at
             FROM api_keys WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn revoke_api_key(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE api_keys SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    pub async fn revoke_active_keys_of_type(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        project_id: Uuid,
        kind: ApiKeyType,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE api_keys SET revoked_at = now()
             WHERE project_id = $1 AND type = $2 AND revoked_at IS NULL",
        )
        .bind(project_id)
        .bind(kind)
        .execute(&mut **tx)
        .await
        .map_err(classify)?;
        Ok(())
    }

    // ---- logical buckets ---------------------------------------------

    pub async fn insert_bucket(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        project_id: Uuid,
        name: &str,
    ) -> Result<LogicalBucket, StoreError> {
        sqlx::query_as::<_, LogicalBucket>(
            "INSERT INTO buckets (id, project_id, name, created_at)
             VALUES ($1, $2, $3, now())
             RETURNING id, project_id, name, created_at",
        )
        .bind(id)
        .bind(project_id)
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(classify)
    }

    pub async fn get_bucket(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<LogicalBucket, StoreError> {
        sqlx::query_as::<_, LogicalBucket>(
            "SELECT id, project_id, name, created_at FROM buckets WHERE project_id = $1 AND name = $2",
        )
        .bind(project_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn list_buckets(&self, project_id: Uuid) -> Result<Vec<LogicalBucket>, StoreError> {
        sqlx::query_as::<_, LogicalBucket>(
            "SELECT id, project_id, name, created_at FROM buckets
             WHERE project_id = $1 ORDER BY name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    // ---- file metadata -------------------------------------------------

    pub async fn upsert_file_metadata(
        &self,
        project_id: Uuid,
        logical_bucket: &str,
        object_key: &str,
        content_type: &str,
        size: i64,
    ) -> Result<FileMetadata, StoreError> {
        sqlx::query_as::<_, FileMetadata>(
            "INSERT INTO file_metadata (id, project_id, logical_bucket, object_key, content_type, size, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, now())
             ON CONFLICT (project_id, object_key)
             DO UPDATE SET content_type = EXCLUDED.content_type, size = EXCLUDED.size
             RETURNING id, project_id, logical_bucket, object_key, content_type, size, created_at",
        )
        .bind(project_id)
        .bind(logical_bucket)
        .bind(object_key)
        .bind(content_type)
        .bind(size)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn delete_file_metadata(
        &self,
        project_id: Uuid,
        object_key: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM file_metadata WHERE project_id = $1 AND object_key = $2")
            .bind(project_id)
            .bind(object_key)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    // ---- audit -----------------------------------------------------------

    /// Best-effort: failures are logged by the caller, never propagated
    /// into the operation the audit entry describes.
    pub async fn write_audit(
        &self,
        project_id: Option<Uuid>,
        user_id: Option<Uuid>,
        action: &str,
        details: Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_logs (id, project_id, user_id, action, details, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, now())",
        )
        .bind(project_id)
        .bind(user_id)
        .bind(action)
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    pub async fn list_audit(
        &self,
        project_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        sqlx::query_as::<_, AuditEntry>(
            "SELECT id, project_id, user_id, action, details, created_at
             FROM audit_logs
             WHERE ($1::uuid IS NULL OR project_id = $1)
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    // ---- backups -----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_backup(
        &self,
        id: Uuid,
        project_id: Option<Uuid>,
        kind: BackupType,
        table_name: Option<&str>,
        format: BackupFormat,
        retention_days: Option<i32>,
        created_by: Option<Uuid>,
    ) -> Result<Backup, StoreError> {
        sqlx::query_as::<_, Backup>(
            "INSERT INTO backups (id, project_id, type, table_name, object_key, size_bytes,
                                   format, status, error_message, retention_days, expires_at,
                                   created_by, created_at, completed_at)
             VALUES ($1, $2, $3, $4, NULL, NULL, $5, 'pending', NULL, $6, NULL, $7, now(), NULL)
             RETURNING id, project_id, type, table_name, object_key, size_bytes, format, status,
                       error_message, retention_days, expires_at, created_by, created_at, completed_at",
        )
        .bind(id)
        .bind(project_id)
        .bind(kind)
        .bind(table_name)
        .bind(format)
        .bind(retention_days)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn mark_backup_running(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE backups SET status = 'running' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    pub async fn mark_backup_completed(
        &self,
        id: Uuid,
        object_key: &str,
        size_bytes: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE backups SET status = 'completed', object_key = $2, size_bytes = $3, completed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(object_key)
        .bind(size_bytes)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    pub async fn mark_backup_failed(&self, id: Uuid, error_message: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE backups SET status = 'failed', error_message = $2 WHERE id = $1")
            .bind(id)
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<Backup, StoreError> {
        sqlx::query_as::<_, Backup>(
            "SELECT id, project_id, type, table_name, object_key, size_bytes, format, status,
                    error_message, retention_days, expires_at, created_by, created_at, completed_at
             FROM backups WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn list_completed_project_backups(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Backup>, StoreError> {
        sqlx::query_as::<_, Backup>(
            "SELECT id, project_id, type, table_name, object_key, size_bytes, format, status,
                    error_message, retention_days, expires_at, created_by, created_at, completed_at
             FROM backups
             WHERE project_id = $1 AND type = 'project' AND status = 'completed'
             ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn list_expired_backups(&self, now: DateTime<Utc>) -> Result<Vec<Backup>, StoreError> {
        sqlx::query_as::<_, Backup>(
            "SELECT id, project_id, type, table_name, object_key, size_bytes, format, status,
                    error_message, retention_days, expires_at, created_by, created_at, completed_at
             FROM backups WHERE expires_at IS NOT NULL AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    /// List backups for the admin dashboard, optionally scoped to one
    /// project, regardless of status or type.
    pub async fn list_backups(&self, project_id: Option<Uuid>) -> Result<Vec<Backup>, StoreError> {
        sqlx::query_as::<_, Backup>(
            "SELECT id, project_id, type, table_name, object_key, size_bytes, format, status,
                    error_message, retention_days, expires_at, created_by, created_at, completed_at
             FROM backups
             WHERE ($1::uuid IS NULL OR project_id = $1)
             ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn delete_backup_row(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM backups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    pub async fn list_project_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM projects")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ---- cron jobs ---------------------------------------------------

    pub async fn list_enabled_jobs(&self) -> Result<Vec<CronJob>, StoreError> {
        sqlx::query_as::<_, CronJob>(
            "SELECT id, project_id, name, type, cron_expr, timezone, url, method,
                    encrypted_headers, encrypted_headers_iv, encrypted_body, encrypted_body_iv,
                    action, config, enabled, timeout_ms, retries, retry_backoff_ms,
                    last_run_at, next_run_at
             FROM cron_jobs WHERE enabled = true",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<CronJob, StoreError> {
        sqlx::query_as::<_, CronJob>(
            "SELECT id, project_id, name, type, cron_expr, timezone, url, method,
                    encrypted_headers, encrypted_headers_iv, encrypted_body, encrypted_body_iv,
                    action, config, enabled, timeout_ms, retries, retry_backoff_ms,
                    last_run_at, next_run_at
             FROM cron_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn set_job_next_run(
        &self,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE cron_jobs SET next_run_at = $2 WHERE id = $1")
            .bind(id)
            .bind(next_run_at)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    pub async fn set_job_last_and_next_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE cron_jobs SET last_run_at = $2, next_run_at = $3 WHERE id = $1")
            .bind(id)
            .bind(last_run_at)
            .bind(next_run_at)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    pub async fn insert_job_run(
        &self,
        id: Uuid,
        job_id: Uuid,
        attempt_number: i32,
    ) -> Result<CronJobRun, StoreError> {
        sqlx::query_as::<_, CronJobRun>(
            "INSERT INTO cron_job_runs (id, job_id, attempt_number, started_at, status)
             VALUES ($1, $2, $3, now(), 'running')
             RETURNING id, job_id, attempt_number, started_at, finished_at, duration_ms, status,
                       http_status, error_text, log_preview",
        )
        .bind(id)
        .bind(job_id)
        .bind(attempt_number)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn finish_job_run(
        &self,
        id: Uuid,
        status: RunStatus,
        duration_ms: i64,
        http_status: Option<i32>,
        error_text: Option<&str>,
        log_preview: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE cron_job_runs
             SET finished_at = now(), duration_ms = $2, status = $3, http_status = $4,
                 error_text = $5, log_preview = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(duration_ms)
        .bind(status)
        .bind(http_status)
        .bind(error_text)
        .bind(log_preview)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    // ---- users & invites ------------------------------------------------

    pub async fn get_user_by_email(&self, email: &str) -> Result<PlatformUser, StoreError> {
        sqlx::query_as::<_, PlatformUser>(
            "SELECT id, email, password_hash, role, created_at FROM platform_users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn list_users(&self) -> Result<Vec<PlatformUser>, StoreError> {
        sqlx::query_as::<_, PlatformUser>(
            "SELECT id, email, password_hash, role, created_at FROM platform_users ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn insert_invite(
        &self,
        id: Uuid,
        email: &str,
        token_hash: &str,
        role: UserRole,
        expires_at: DateTime<Utc>,
    ) -> Result<InviteKey, StoreError> {
        sqlx::query_as::<_, InviteKey>(
            "INSERT INTO invite_keys (id, email, token_hash, role, expires_at, used_at, created_at)
             VALUES ($1, $2, $3, $4, $5, NULL, now())
             RETURNING id, email, token_hash, role, expires_at, used_at, created_at",
        )
        .bind(id)
        .bind(email)
        .bind(token_hash)
        .bind(role)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    pub async fn mark_invite_used(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE invite_keys SET used_at = now() WHERE id = $1 AND used_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
