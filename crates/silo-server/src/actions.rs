//! Concrete implementations of the two trait seams `silo-core`'s scheduler
//! leaves open: dispatching its own built-in platform actions, and making
//! the outbound HTTP call for webhook-type jobs. Both are wired into
//! `AppState` at startup and handed to `Scheduler::new` as trait objects.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use silo_core::backup::BackupEngine;
use silo_core::crypto::Crypto;
use silo_core::models::{BackupFormat, BackupType, Principal};
use silo_core::scheduler::{HttpJobRunner, PlatformActionRunner, SchedulerError};
use silo_core::store::Store;

/// Dedicated pool used only for `vacuum_database`; a single connection is
/// enough to run `VACUUM ANALYZE` and is never shared with the app/owner
/// pools the router caches.
const VACUUM_POOL_CONNECTIONS: u32 = 1;

/// Implements the platform actions spec.md §4.10 names: backups, retention
/// sweeps, vacuuming, and a status heartbeat. Anything else is unknown.
pub struct ServerPlatformActions {
    store: Store,
    crypto: Arc<Crypto>,
    backups: Arc<BackupEngine>,
}

impl ServerPlatformActions {
    #[must_use]
    pub fn new(store: Store, crypto: Arc<Crypto>, backups: Arc<BackupEngine>) -> Self {
        Self {
            store,
            crypto,
            backups,
        }
    }

    async fn backup_project(&self, project_id: Uuid) -> Result<String, SchedulerError> {
        let backup = self
            .backups
            .create(
                BackupType::Project,
                Some(project_id),
                None,
                BackupFormat::Sql,
                None,
                None,
            )
            .await?;
        self.backups.run(backup.id).await?;
        Ok(format!("queued backup {} for project {project_id}", backup.id))
    }

    async fn backup_all_projects(&self) -> Result<String, SchedulerError> {
        let project_ids = self.store.list_project_ids().await?;
        let mut queued = 0usize;
        for project_id in &project_ids {
            if let Err(err) = self.backup_project(*project_id).await {
                tracing::warn!(%project_id, error = %err, "backup_all_projects: one project failed");
                continue;
            }
            queued += 1;
        }
        Ok(format!("queued backups for {queued}/{} projects", project_ids.len()))
    }

    async fn cleanup_backups_with_retention(
        &self,
        project_id: Option<Uuid>,
    ) -> Result<String, SchedulerError> {
        let deleted = if let Some(project_id) = project_id {
            self.backups.cleanup_with_retention(project_id).await?
        } else {
            let mut total = 0u64;
            for project_id in self.store.list_project_ids().await? {
                total += self.backups.cleanup_with_retention(project_id).await?;
            }
            total
        };
        Ok(format!("deleted {deleted} backups under retention policy"))
    }

    async fn cleanup_expired_backups(&self) -> Result<String, SchedulerError> {
        let deleted = self.backups.cleanup_expired().await?;
        Ok(format!("deleted {deleted} expired backups"))
    }

    async fn vacuum_database(&self, project_id: Option<Uuid>) -> Result<String, SchedulerError> {
        let project_ids = match project_id {
            Some(id) => vec![id],
            None => self.store.list_project_ids().await?,
        };

        let mut vacuumed = 0usize;
        for project_id in &project_ids {
            if let Err(err) = self.vacuum_one(*project_id).await {
                tracing::warn!(%project_id, error = %err, "vacuum_database: one project failed");
                continue;
            }
            vacuumed += 1;
        }
        Ok(format!("vacuumed {vacuumed}/{} databases", project_ids.len()))
    }

    async fn vacuum_one(&self, project_id: Uuid) -> Result<(), SchedulerError> {
        let cred = self.store.get_credential(project_id, Principal::Owner).await?;
        let envelope = silo_core::crypto::Envelope {
            ciphertext: cred.ciphertext,
            iv: cred.iv,
        };
        let conn = self.crypto.decrypt_to_string(&envelope)?;

        let pool = PgPoolOptions::new()
            .max_connections(VACUUM_POOL_CONNECTIONS)
            .connect(&conn)
            .await
            .map_err(|e| SchedulerError::Http(format!("vacuum connect failed: {e}")))?;
        let result = sqlx::query("VACUUM ANALYZE").execute(&pool).await;
        pool.close().await;
        result
            .map(|_| ())
            .map_err(|e| SchedulerError::Http(format!("vacuum failed: {e}")))
    }

    async fn notify_status(&self) -> Result<String, SchedulerError> {
        let project_count = self.store.list_project_ids().await?.len();
        tracing::info!(project_count, "scheduler status heartbeat");
        Ok(format!("ok: {project_count} projects under management"))
    }
}

#[async_trait]
impl PlatformActionRunner for ServerPlatformActions {
    async fn run(&self, action: &str, project_id: Option<Uuid>) -> Result<String, SchedulerError> {
        match action {
            "backup_project" => {
                let project_id = project_id.ok_or_else(|| SchedulerError::MissingProjectId {
                    action: action.to_owned(),
                })?;
                self.backup_project(project_id).await
            }
            "backup_all_projects" => self.backup_all_projects().await,
            "cleanup_backups_with_retention" => {
                self.cleanup_backups_with_retention(project_id).await
            }
            "cleanup_expired_backups" => self.cleanup_expired_backups().await,
            "vacuum_database" => self.vacuum_database(project_id).await,
            "notify_status" => self.notify_status().await,
            other => Err(SchedulerError::UnknownAction(other.to_owned())),
        }
    }
}

/// `reqwest`-backed webhook dispatcher for `CronJobType::Http` jobs. A
/// fresh client per job keeps the per-job timeout honest instead of relying
/// on a shared client's default.
pub struct ReqwestJobRunner;

#[async_trait]
impl HttpJobRunner for ReqwestJobRunner {
    async fn run(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<(u16, Vec<u8>), SchedulerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Http(e.to_string()))?;

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| SchedulerError::Http(format!("invalid method '{method}': {e}")))?;
        let mut request = client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SchedulerError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SchedulerError::Http(e.to_string()))?;
        Ok((status, bytes.to_vec()))
    }
}
