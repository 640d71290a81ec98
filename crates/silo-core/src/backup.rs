//! Backup/restore subprocess driver and tiered retention classification.
//!
//! Dumps and restores are driven through `pg_dump`/`pg_restore` as
//! subprocesses with stdin/stdout/stderr explicitly piped; table exports go
//! through the owner pool directly and are serialized in-process.

use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Column, PgPool, Row};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use uuid::Uuid;

use silo_storage::ObjectStore;

use crate::crypto::{Crypto, CryptoError};
use crate::models::{Backup, BackupFormat, BackupType, Principal};
use crate::router::{RouterError, TenantRouter};
use crate::store::{Store, StoreError};

const TABLE_EXPORT_ROW_CAP: i64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("storage error: {0}")]
    Storage(#[from] silo_storage::StorageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("subprocess failed: {reason}")]
    Subprocess { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a project-scoped backup/restore requires a project id")]
    MissingProjectId,

    #[error("a table export requires a table name")]
    MissingTableName,
}

pub struct RestoreOutcome {
    pub success: bool,
    pub warnings: Vec<String>,
}

/// How a completed project backup should be treated by the retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    Keep,
    Delete,
}

/// Classify `backups` (already newest-first, already filtered to one
/// project's completed `project`-type rows) by age tier:
///
/// - `age < 3d` → keep all.
/// - `3d <= age < 7d` → keep the newest in this band, delete the rest of it.
/// - `7d <= age < 14d` → keep the newest in this band, delete the rest of it.
/// - `age >= 14d` → delete all.
///
/// The two middle bands are tracked independently — each contributes its
/// own "newest kept" survivor, so a project with backups in both the 3–7d
/// and 7–14d windows keeps exactly one from each.
#[must_use]
pub fn classify_retention(
    backups: &[Backup],
    now: DateTime<Utc>,
) -> Vec<(Uuid, RetentionDecision)> {
    let mut kept_band_a = false;
    let mut kept_band_b = false;
    backups
        .iter()
        .map(|backup| {
            let age = now - backup.created_at;
            let decision = if age < ChronoDuration::days(3) {
                RetentionDecision::Keep
            } else if age < ChronoDuration::days(7) {
                if kept_band_a {
                    RetentionDecision::Delete
                } else {
                    kept_band_a = true;
                    RetentionDecision::Keep
                }
            } else if age < ChronoDuration::days(14) {
                if kept_band_b {
                    RetentionDecision::Delete
                } else {
                    kept_band_b = true;
                    RetentionDecision::Keep
                }
            } else {
                RetentionDecision::Delete
            };
            (backup.id, decision)
        })
        .collect()
}

pub struct BackupEngine {
    store: Store,
    crypto: Arc<Crypto>,
    router: Arc<TenantRouter>,
    object_store: Arc<dyn ObjectStore>,
    backup_bucket: String,
    platform_conn: String,
}

impl BackupEngine {
    #[must_use]
    pub fn new(
        store: Store,
        crypto: Arc<Crypto>,
        router: Arc<TenantRouter>,
        object_store: Arc<dyn ObjectStore>,
        backup_bucket: String,
        platform_conn: String,
    ) -> Self {
        Self {
            store,
            crypto,
            router,
            object_store,
            backup_bucket,
            platform_conn,
        }
    }

    /// Insert a `pending` backup row. The caller is expected to spawn
    /// [`BackupEngine::run`] asynchronously rather than await it inline.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::MissingProjectId`]/[`BackupError::MissingTableName`]
    /// if the invariants for `kind` aren't met, or a store error.
    pub async fn create(
        &self,
        kind: BackupType,
        project_id: Option<Uuid>,
        table_name: Option<&str>,
        format: BackupFormat,
        retention_days: Option<i32>,
        created_by: Option<Uuid>,
    ) -> Result<Backup, BackupError> {
        if kind != BackupType::Platform && project_id.is_none() {
            return Err(BackupError::MissingProjectId);
        }
        if kind == BackupType::Table && table_name.is_none() {
            return Err(BackupError::MissingTableName);
        }
        Ok(self
            .store
            .insert_backup(
                Uuid::new_v4(),
                project_id,
                kind,
                table_name,
                format,
                retention_days,
                created_by,
            )
            .await?)
    }

    /// Execute a previously created backup row: transition to `running`,
    /// produce bytes, upload, and transition to `completed`/`failed`.
    ///
    /// # Errors
    ///
    /// Never returns `Err` for a backup-production failure — those are
    /// recorded on the row as `failed` and this returns `Ok(())`. Only a
    /// failure to even update the row's status surfaces as `Err`.
    pub async fn run(&self, backup_id: Uuid) -> Result<(), BackupError> {
        let backup = self.store.get_backup(backup_id).await?;
        self.store.mark_backup_running(backup_id).await?;

        let produced = match backup.kind {
            BackupType::Platform => self.dump_platform().await,
            BackupType::Project => {
                let project_id = backup.project_id.ok_or(BackupError::MissingProjectId)?;
                self.dump_project(project_id).await
            }
            BackupType::Table => {
                let project_id = backup.project_id.ok_or(BackupError::MissingProjectId)?;
                let table = backup.table_name.clone().ok_or(BackupError::MissingTableName)?;
                self.export_table(project_id, &table, backup.format).await
            }
        };

        match produced {
            Ok(bytes) => {
                let object_key = object_key_for(&backup, backup_id);
                let size = bytes.len() as u64;
                if let Err(err) = self
                    .object_store
                    .put(&self.backup_bucket, &object_key, bytes, content_type_for(backup.format))
                    .await
                {
                    self.store
                        .mark_backup_failed(backup_id, &format!("upload failed: {err}"))
                        .await?;
                    return Ok(());
                }
                self.store
                    .mark_backup_completed(backup_id, &object_key, size as i64)
                    .await?;
            }
            Err(err) => {
                self.store
                    .mark_backup_failed(backup_id, &err.to_string())
                    .await?;
            }
        }
        Ok(())
    }

    async fn dump_platform(&self) -> Result<Vec<u8>, BackupError> {
        run_pg_dump(&self.platform_conn).await
    }

    async fn dump_project(&self, project_id: Uuid) -> Result<Vec<u8>, BackupError> {
        let conn = self.decrypt_owner_conn(project_id).await?;
        run_pg_dump(&conn).await
    }

    async fn decrypt_owner_conn(&self, project_id: Uuid) -> Result<String, BackupError> {
        let cred = self.store.get_credential(project_id, Principal::Owner).await?;
        let envelope = crate::crypto::Envelope {
            ciphertext: cred.ciphertext,
            iv: cred.iv,
        };
        Ok(self.crypto.decrypt_to_string(&envelope)?)
    }

    async fn export_table(
        &self,
        project_id: Uuid,
        table: &str,
        format: BackupFormat,
    ) -> Result<Vec<u8>, BackupError> {
        let owner_pool: PgPool = self.router.pool(project_id, Principal::Owner).await?;
        let rows = sqlx::query(&format!(
            "SELECT * FROM \"{table}\" LIMIT {TABLE_EXPORT_ROW_CAP}"
        ))
        .fetch_all(&owner_pool)
        .await?;

        match format {
            BackupFormat::Json => Ok(serde_json::to_vec(
                &rows.iter().map(row_to_json).collect::<Vec<_>>(),
            )
            .unwrap_or_default()),
            _ => Ok(rows_to_csv(&rows).into_bytes()),
        }
    }

    /// Download a completed `project`/`sql` backup's object, decrypt the
    /// tenant credential, and feed the bytes to `pg_restore` via stdin.
    ///
    /// # Errors
    ///
    /// Returns a propagated store/router/storage/crypto error, or
    /// [`BackupError::Subprocess`] if `pg_restore` cannot be spawned.
    pub async fn restore(&self, backup_id: Uuid) -> Result<RestoreOutcome, BackupError> {
        let backup = self.store.get_backup(backup_id).await?;
        let project_id = backup.project_id.ok_or(BackupError::MissingProjectId)?;
        let object_key = backup.object_key.ok_or(BackupError::Subprocess {
            reason: "backup has no object key".to_owned(),
        })?;

        let bytes = self
            .object_store
            .get(&self.backup_bucket, &object_key)
            .await?
            .ok_or(BackupError::Subprocess {
                reason: "backup object missing from storage".to_owned(),
            })?;
        let conn = self.decrypt_owner_conn(project_id).await?;
        run_pg_restore(&conn, bytes).await
    }

    /// Apply the tiered retention policy to one project's completed
    /// `project`-type backups. Object deletion errors are swallowed — the
    /// row deletion is what matters for the retention contract.
    ///
    /// # Errors
    ///
    /// Returns a store error if listing or row-deletion fails.
    pub async fn cleanup_with_retention(&self, project_id: Uuid) -> Result<u64, BackupError> {
        let backups = self.store.list_completed_project_backups(project_id).await?;
        let decisions = classify_retention(&backups, Utc::now());
        let mut deleted = 0u64;
        for (id, decision) in decisions {
            if decision != RetentionDecision::Delete {
                continue;
            }
            if let Some(backup) = backups.iter().find(|b| b.id == id) {
                if let Some(key) = &backup.object_key {
                    let _ = self.object_store.delete(&self.backup_bucket, key).await;
                }
            }
            self.store.delete_backup_row(id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Legacy-expiry cleanup: delete every backup row whose `expires_at` has
    /// passed, regardless of type. Orthogonal to tiered retention.
    ///
    /// # Errors
    ///
    /// Returns a store error if listing or deletion fails.
    pub async fn cleanup_expired(&self) -> Result<u64, BackupError> {
        let expired = self.store.list_expired_backups(Utc::now()).await?;
        let mut deleted = 0u64;
        for backup in expired {
            if let Some(key) = &backup.object_key {
                let _ = self.object_store.delete(&self.backup_bucket, key).await;
            }
            self.store.delete_backup_row(backup.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

fn object_key_for(backup: &Backup, backup_id: Uuid) -> String {
    let ts = Utc::now().format("%Y%m%dT%H%M%S");
    match backup.kind {
        BackupType::Platform => format!("platform/platform_{ts}.sql"),
        BackupType::Project => {
            let project_id = backup.project_id.unwrap_or(backup_id);
            format!("projects/{project_id}/full_{ts}.sql")
        }
        BackupType::Table => {
            let project_id = backup.project_id.unwrap_or(backup_id);
            let table = backup.table_name.clone().unwrap_or_default();
            let ext = match backup.format {
                BackupFormat::Json => "json",
                _ => "csv",
            };
            format!("projects/{project_id}/tables/{table}_{ts}.{ext}")
        }
    }
}

fn content_type_for(format: BackupFormat) -> &'static str {
    match format {
        BackupFormat::Sql => "application/octet-stream",
        BackupFormat::Csv => "text/csv",
        BackupFormat::Json => "application/json",
    }
}

async fn run_pg_dump(conn: &str) -> Result<Vec<u8>, BackupError> {
    let mut child = Command::new("pg_dump")
        .args(["-d", conn, "--no-owner", "--no-acl", "-Fc"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| BackupError::Subprocess {
            reason: format!("failed to spawn pg_dump: {err}"),
        })?;

    let mut stdout = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_end(&mut stdout).await?;
    }
    let status = child.wait().await?;
    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr).await.ok();
        }
        return Err(BackupError::Subprocess {
            reason: format!("pg_dump exited with {status}: {stderr}"),
        });
    }
    Ok(stdout)
}

async fn run_pg_restore(conn: &str, bytes: Vec<u8>) -> Result<RestoreOutcome, BackupError> {
    let mut child = Command::new("pg_restore")
        .args(["-d", conn, "--clean", "--if-exists", "--no-owner", "--no-acl"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| BackupError::Subprocess {
            reason: format!("failed to spawn pg_restore: {err}"),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&bytes).await?;
        stdin.shutdown().await?;
    }

    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        err.read_to_string(&mut stderr).await.ok();
    }
    let status = child.wait().await?;

    match status.code() {
        Some(0) => Ok(RestoreOutcome {
            success: true,
            warnings: Vec::new(),
        }),
        Some(1) => Ok(RestoreOutcome {
            success: true,
            warnings: stderr.lines().take(10).map(str::to_owned).collect(),
        }),
        _ => Err(BackupError::Subprocess {
            reason: format!("pg_restore exited with {status}: {stderr}"),
        }),
    }
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = row
            .try_get::<String, _>(i)
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null);
        map.insert(column.name().to_owned(), value);
    }
    map
}

fn rows_to_csv(rows: &[sqlx::postgres::PgRow]) -> String {
    let mut out = String::new();
    if let Some(first) = rows.first() {
        let headers: Vec<String> = first.columns().iter().map(|c| escape_csv(c.name())).collect();
        out.push_str(&headers.join(","));
        out.push('\n');
    }
    for row in rows {
        let cells: Vec<String> = row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let text = row.try_get::<String, _>(i).unwrap_or_default();
                escape_csv(&text)
            })
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

/// Escape a single CSV field per RFC 4180: quote it if it contains a comma,
/// quote, or newline, doubling any embedded quotes.
fn escape_csv(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup_at(age_days: i64, now: DateTime<Utc>) -> Backup {
        Backup {
            id: Uuid::new_v4(),
            project_id: Some(Uuid::new_v4()),
            kind: BackupType::Project,
            table_name: None,
            object_key: Some("k".to_owned()),
            size_bytes: Some(1),
            format: BackupFormat::Sql,
            status: BackupStatusShim::Completed.into(),
            error_message: None,
            retention_days: None,
            expires_at: None,
            created_by: None,
            created_at: now - ChronoDuration::days(age_days),
            completed_at: Some(now),
        }
    }

    // Thin shim so the test module doesn't need to import BackupStatus
    // separately from the surrounding module's imports.
    enum BackupStatusShim {
        Completed,
    }
    impl From<BackupStatusShim> for crate::models::BackupStatus {
        fn from(_: BackupStatusShim) -> Self {
            crate::models::BackupStatus::Completed
        }
    }

    #[test]
    fn keeps_everything_under_three_days() {
        let now = Utc::now();
        let backups = vec![backup_at(0, now), backup_at(2, now)];
        let decisions = classify_retention(&backups, now);
        assert!(decisions.iter().all(|(_, d)| *d == RetentionDecision::Keep));
    }

    #[test]
    fn keeps_the_newest_of_each_middle_band_independently() {
        let now = Utc::now();
        // two in the 3-7d band, two in the 7-14d band
        let backups = vec![
            backup_at(4, now),
            backup_at(6, now),
            backup_at(8, now),
            backup_at(12, now),
        ];
        let decisions = classify_retention(&backups, now);
        assert_eq!(decisions[0].1, RetentionDecision::Keep);
        assert_eq!(decisions[1].1, RetentionDecision::Delete);
        assert_eq!(decisions[2].1, RetentionDecision::Keep);
        assert_eq!(decisions[3].1, RetentionDecision::Delete);
    }

    #[test]
    fn deletes_everything_at_or_past_fourteen_days() {
        let now = Utc::now();
        let backups = vec![backup_at(14, now), backup_at(30, now)];
        let decisions = classify_retention(&backups, now);
        assert!(decisions.iter().all(|(_, d)| *d == RetentionDecision::Delete));
    }

    #[test]
    fn csv_escaping_quotes_fields_with_commas_and_quotes() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn object_key_layout_matches_the_documented_scheme() {
        let project_id = Uuid::new_v4();
        let platform = Backup {
            project_id: None,
            kind: BackupType::Platform,
            ..backup_at(0, Utc::now())
        };
        assert!(object_key_for(&platform, Uuid::new_v4()).starts_with("platform/"));

        let project = Backup {
            project_id: Some(project_id),
            kind: BackupType::Project,
            ..backup_at(0, Utc::now())
        };
        let key = object_key_for(&project, Uuid::new_v4());
        assert!(key.starts_with(&format!("projects/{project_id}/full_")));

        let table = Backup {
            project_id: Some(project_id),
            kind: BackupType::Table,
            table_name: Some("users".to_owned()),
            format: BackupFormat::Csv,
            ..backup_at(0, Utc::now())
        };
        let key = object_key_for(&table, Uuid::new_v4());
        assert!(key.starts_with(&format!("projects/{project_id}/tables/users_")));
        assert!(key.ends_with(".csv"));
    }
}
