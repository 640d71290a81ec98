//! Cron-driven job scheduling domain logic.
//!
//! This module owns the live registry of scheduling arms and the dispatch
//! state machine; the polling loop that drives [`Scheduler::sync_jobs`] on
//! an interval lives in the server binary, mirroring how lease expiry is
//! split between a domain manager and a background worker.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto::{Crypto, CryptoError};
use crate::models::{CronJob, CronJobType, RunStatus};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCronExpr { expr: String, reason: String },

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("unknown platform action: {0}")]
    UnknownAction(String),

    #[error("http job request failed: {0}")]
    Http(String),

    #[error("platform action '{action}' requires a project id")]
    MissingProjectId { action: String },

    #[error("backup engine error: {0}")]
    Backup(#[from] crate::backup::BackupError),
}

/// One job's live scheduling state: its cron expression and timezone, and
/// the absolute instant it next fires. `next_fire` is computed once when
/// the arm is installed (or the job's schedule changes) and then only ever
/// advances on an actual dispatch — a resync that finds the schedule
/// unchanged leaves it alone. That makes due-ness an absolute comparison
/// against `next_fire` rather than a recomputation relative to "now", so a
/// fire isn't lost if the poll tick lands any time after it elapses.
struct SchedulingArm {
    schedule: Schedule,
    timezone: Tz,
    cron_expr: String,
    timezone_name: String,
    next_fire: DateTime<Utc>,
}

impl SchedulingArm {
    fn build(job: &CronJob, now: DateTime<Utc>) -> Result<Self, SchedulerError> {
        let schedule = Schedule::from_str(&job.cron_expr).map_err(|err| {
            SchedulerError::InvalidCronExpr {
                expr: job.cron_expr.clone(),
                reason: err.to_string(),
            }
        })?;
        let timezone: Tz = job
            .timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(job.timezone.clone()))?;
        let mut arm = Self {
            schedule,
            timezone,
            cron_expr: job.cron_expr.clone(),
            timezone_name: job.timezone.clone(),
            next_fire: now,
        };
        if let Some(next) = arm.next_run_after(now) {
            arm.next_fire = next;
        }
        Ok(arm)
    }

    fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.schedule
            .after(&local)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn matches_schedule(&self, job: &CronJob) -> bool {
        self.cron_expr == job.cron_expr && self.timezone_name == job.timezone
    }
}

/// A platform action a `platform`-type job can invoke. Implemented by the
/// server binary, which has the broker/backup-engine handles these actions
/// need; the scheduler only knows the name.
#[async_trait::async_trait]
pub trait PlatformActionRunner: Send + Sync {
    async fn run(&self, action: &str, project_id: Option<Uuid>) -> Result<String, SchedulerError>;
}

/// An HTTP job dispatcher. Implemented by the server binary so the
/// scheduler domain logic stays free of a concrete HTTP client dependency.
#[async_trait::async_trait]
pub trait HttpJobRunner: Send + Sync {
    async fn run(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<(u16, Vec<u8>), SchedulerError>;
}

pub struct DispatchOutcome {
    pub succeeded: bool,
    pub attempts: u32,
}

/// Process-wide scheduler state: the live registry of scheduling arms, the
/// count of in-flight dispatches, and the configured concurrency cap.
pub struct Scheduler {
    store: Store,
    crypto: Arc<Crypto>,
    arms: RwLock<HashMap<Uuid, SchedulingArm>>,
    running_count: AtomicU32,
    max_concurrent: u32,
    platform_actions: Arc<dyn PlatformActionRunner>,
    http_runner: Arc<dyn HttpJobRunner>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        store: Store,
        crypto: Arc<Crypto>,
        max_concurrent: u32,
        platform_actions: Arc<dyn PlatformActionRunner>,
        http_runner: Arc<dyn HttpJobRunner>,
    ) -> Self {
        Self {
            store,
            crypto,
            arms: RwLock::new(HashMap::new()),
            running_count: AtomicU32::new(0),
            max_concurrent,
            platform_actions,
            http_runner,
        }
    }

    /// Load all enabled jobs, cancel the arm of any job no longer present,
    /// and (re)install an arm for every loaded job whose schedule is new or
    /// has changed. Persists `nextRunAt` on each (re)install.
    ///
    /// A job already holding an arm with an unchanged `cronExpr`/`timezone`
    /// is left untouched — re-deriving "next fire after now" on every sync
    /// would perpetually push a due-but-not-yet-dispatched fire back into
    /// the future, and this is the only path by which a job's arm can be
    /// replaced, satisfying invariant I4.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if loading jobs fails; a single
    /// job with a malformed cron expression is skipped (logged by the
    /// caller) rather than aborting the whole sync.
    pub async fn sync_jobs(&self) -> Result<Vec<(Uuid, SchedulerError)>, SchedulerError> {
        let jobs = self.store.list_enabled_jobs().await?;
        let loaded_ids: std::collections::HashSet<Uuid> = jobs.iter().map(|j| j.id).collect();

        {
            let mut arms = self.arms.write().await;
            arms.retain(|id, _| loaded_ids.contains(id));
        }

        let now = Utc::now();
        let mut failures = Vec::new();
        for job in &jobs {
            let unchanged = self
                .arms
                .read()
                .await
                .get(&job.id)
                .is_some_and(|arm| arm.matches_schedule(job));
            if unchanged {
                continue;
            }
            match SchedulingArm::build(job, now) {
                Ok(arm) => {
                    let next = arm.next_fire;
                    self.arms.write().await.insert(job.id, arm);
                    self.store.set_job_next_run(job.id, Some(next)).await?;
                }
                Err(err) => failures.push((job.id, err)),
            }
        }
        Ok(failures)
    }

    /// Every job id currently holding a live scheduling arm.
    pub async fn active_job_ids(&self) -> Vec<Uuid> {
        self.arms.read().await.keys().copied().collect()
    }

    /// Whether `job_id`'s arm, if installed, is due to fire at or before
    /// `now`. Compares the arm's persisted `next_fire` instant directly, so
    /// this is correct regardless of how long it's been since the last
    /// poll tick — a slow or delayed poll still catches every elapsed fire.
    pub async fn is_due(&self, job_id: Uuid, now: DateTime<Utc>) -> bool {
        self.arms
            .read()
            .await
            .get(&job_id)
            .is_some_and(|arm| arm.next_fire <= now)
    }

    /// Dispatch a firing for `job_id`. If the concurrency cap is already
    /// reached, the firing is dropped (not queued) — the next fire
    /// re-evaluates. Otherwise runs up to `retries + 1` attempts with
    /// `retryBackoffMs` sleeps between them, recording a
    /// [`crate::models::CronJobRun`] per attempt.
    ///
    /// # Errors
    ///
    /// Returns a store/crypto error only if persistence itself fails;
    /// dispatch-level failures (HTTP error, platform action error) are
    /// recorded on the run row, not returned.
    pub async fn dispatch(&self, job_id: Uuid) -> Result<Option<DispatchOutcome>, SchedulerError> {
        if self.running_count.load(Ordering::SeqCst) >= self.max_concurrent {
            return Ok(None);
        }
        self.running_count.fetch_add(1, Ordering::SeqCst);
        let outcome = self.dispatch_inner(job_id).await;
        self.running_count.fetch_sub(1, Ordering::SeqCst);
        outcome.map(Some)
    }

    async fn dispatch_inner(&self, job_id: Uuid) -> Result<DispatchOutcome, SchedulerError> {
        let job = self.store.get_job(job_id).await?;
        let max_attempts = u32::try_from(job.retries).unwrap_or(0) + 1;
        let mut succeeded = false;
        let mut attempts = 0u32;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let run = self
                .store
                .insert_job_run(Uuid::new_v4(), job_id, i32::try_from(attempt).unwrap_or(i32::MAX))
                .await?;
            let started = std::time::Instant::now();

            let result = self.execute_once(&job).await;
            let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

            match result {
                Ok((status, http_status, preview)) => {
                    self.store
                        .finish_job_run(run.id, status, duration_ms, http_status, None, preview.as_deref())
                        .await?;
                    if status == RunStatus::Success {
                        succeeded = true;
                        break;
                    }
                }
                Err(err) => {
                    self.store
                        .finish_job_run(run.id, RunStatus::Fail, duration_ms, None, Some(&err.to_string()), None)
                        .await?;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(job.retry_backoff_ms.max(0) as u64)).await;
            }
        }

        let now = Utc::now();
        let arm_next = {
            let mut arms = self.arms.write().await;
            arms.get_mut(&job_id).and_then(|arm| {
                let next = arm.next_run_after(now);
                arm.next_fire = next.unwrap_or(now);
                next
            })
        };
        self.store
            .set_job_last_and_next_run(job_id, now, arm_next)
            .await?;

        Ok(DispatchOutcome { succeeded, attempts })
    }

    async fn execute_once(
        &self,
        job: &CronJob,
    ) -> Result<(RunStatus, Option<i32>, Option<String>), SchedulerError> {
        match job.job_type {
            CronJobType::Http => self.execute_http(job).await,
            CronJobType::Platform => self.execute_platform(job).await,
        }
    }

    async fn execute_http(
        &self,
        job: &CronJob,
    ) -> Result<(RunStatus, Option<i32>, Option<String>), SchedulerError> {
        let url = job.url.clone().unwrap_or_default();
        let method = job.method.clone().unwrap_or_else(|| "GET".to_owned());
        let headers = self.decrypt_headers(job)?;
        let body = self.decrypt_body(job)?;
        let timeout = Duration::from_millis(job.timeout_ms.max(0) as u64);

        match self
            .http_runner
            .run(&url, &method, &headers, body.as_deref(), timeout)
            .await
        {
            Ok((status, body)) => {
                let preview: String = String::from_utf8_lossy(&body[..body.len().min(500)]).into_owned();
                let run_status = if (200..300).contains(&status) {
                    RunStatus::Success
                } else {
                    RunStatus::Fail
                };
                Ok((run_status, Some(i32::from(status)), Some(preview)))
            }
            Err(err) => Err(err),
        }
    }

    async fn execute_platform(
        &self,
        job: &CronJob,
    ) -> Result<(RunStatus, Option<i32>, Option<String>), SchedulerError> {
        let action = job
            .action
            .clone()
            .ok_or_else(|| SchedulerError::UnknownAction("<missing>".to_owned()))?;
        let preview = self.platform_actions.run(&action, job.project_id).await?;
        Ok((RunStatus::Success, None, Some(preview)))
    }

    fn decrypt_headers(&self, job: &CronJob) -> Result<Vec<(String, String)>, SchedulerError> {
        let (Some(ciphertext), Some(iv)) = (&job.encrypted_headers, &job.encrypted_headers_iv) else {
            return Ok(Vec::new());
        };
        let envelope = crate::crypto::Envelope {
            ciphertext: ciphertext.clone(),
            iv: iv.clone(),
        };
        let plaintext = self.crypto.decrypt_to_string(&envelope)?;
        let parsed: HashMap<String, String> = serde_json::from_str(&plaintext).unwrap_or_default();
        Ok(parsed.into_iter().collect())
    }

    fn decrypt_body(&self, job: &CronJob) -> Result<Option<Vec<u8>>, SchedulerError> {
        let (Some(ciphertext), Some(iv)) = (&job.encrypted_body, &job.encrypted_body_iv) else {
            return Ok(None);
        };
        let envelope = crate::crypto::Envelope {
            ciphertext: ciphertext.clone(),
            iv: iv.clone(),
        };
        Ok(Some(self.crypto.decrypt(&envelope)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(cron_expr: &str) -> CronJob {
        CronJob {
            id: Uuid::new_v4(),
            project_id: None,
            name: "test".to_owned(),
            job_type: CronJobType::Platform,
            cron_expr: cron_expr.to_owned(),
            timezone: "UTC".to_owned(),
            url: None,
            method: None,
            encrypted_headers: None,
            encrypted_headers_iv: None,
            encrypted_body: None,
            encrypted_body_iv: None,
            action: Some("vacuum_database".to_owned()),
            config: None,
            enabled: true,
            timeout_ms: 5000,
            retries: 2,
            retry_backoff_ms: 100,
            last_run_at: None,
            next_run_at: None,
        }
    }

    #[test]
    fn scheduling_arm_rejects_malformed_cron_expressions() {
        let mut job = sample_job("not a cron expr");
        job.cron_expr = "not a cron expr".to_owned();
        assert!(SchedulingArm::build(&job, Utc::now()).is_err());
    }

    #[test]
    fn scheduling_arm_accepts_a_standard_five_field_expression_with_seconds() {
        // the `cron` crate's grammar is seconds-first (6 fields)
        let job = sample_job("0 0 * * * *");
        assert!(SchedulingArm::build(&job, Utc::now()).is_ok());
    }

    #[test]
    fn scheduling_arm_rejects_unknown_timezone() {
        let mut job = sample_job("0 0 * * * *");
        job.timezone = "Mars/Olympus_Mons".to_owned();
        assert!(SchedulingArm::build(&job, Utc::now()).is_err());
    }

    #[test]
    fn next_run_after_advances_strictly_forward() {
        let job = sample_job("0 0 0 * * *");
        let now = Utc::now();
        let arm = SchedulingArm::build(&job, now).unwrap();
        let next = arm.next_run_after(now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn next_fire_is_set_on_build_and_survives_an_unrelated_resync() {
        let job = sample_job("0 0 0 * * *");
        let now = Utc::now();
        let arm = SchedulingArm::build(&job, now).unwrap();
        assert!(arm.next_fire > now);
        assert!(arm.matches_schedule(&job));
    }

    #[test]
    fn matches_schedule_detects_a_changed_cron_expr_or_timezone() {
        let job = sample_job("0 0 0 * * *");
        let arm = SchedulingArm::build(&job, Utc::now()).unwrap();
        let mut changed = job.clone();
        changed.cron_expr = "0 0 12 * * *".to_owned();
        assert!(!arm.matches_schedule(&changed));
        let mut retimezoned = job;
        retimezoned.timezone = "America/New_York".to_owned();
        assert!(!arm.matches_schedule(&retimezoned));
    }
}
