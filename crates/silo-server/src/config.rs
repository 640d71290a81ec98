//! Process configuration, read once at startup from the environment.

use std::env;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Immutable, process-lifetime configuration. Distinguished from
/// [`RuntimeSettings`] — values here require a restart to change; values
/// there are atomically swappable at runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub platform_database_url: String,
    pub tenant_host_conn_base: String,
    pub master_key_secret: String,
    pub storage_backend: StorageBackendKind,
    pub s3_endpoint_url: Option<String>,
    pub backup_bucket: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    S3,
    Memory,
}

impl ServerConfig {
    /// Build config from the environment.
    ///
    /// Bind address resolution mirrors common PaaS conventions: an explicit
    /// `SILO_BIND_ADDR` wins, then a bare `PORT` (as set by Railway/Heroku-
    /// style platforms) binds on `0.0.0.0:<PORT>`, then a fixed default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for a required variable that is
    /// absent, or [`ConfigError::Invalid`] for one that fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = if let Ok(addr) = env::var("SILO_BIND_ADDR") {
            addr
        } else if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{port}")
        } else {
            "127.0.0.1:8900".to_owned()
        };

        let platform_database_url = env::var("SILO_PLATFORM_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("SILO_PLATFORM_DATABASE_URL"))?;
        let tenant_host_conn_base = env::var("SILO_TENANT_HOST_CONN_BASE")
            .map_err(|_| ConfigError::Missing("SILO_TENANT_HOST_CONN_BASE"))?;
        let master_key_secret = env::var("SILO_MASTER_KEY_SECRET")
            .map_err(|_| ConfigError::Missing("SILO_MASTER_KEY_SECRET"))?;

        let storage_backend = match env::var("SILO_STORAGE_BACKEND").as_deref() {
            Ok("memory") => StorageBackendKind::Memory,
            Ok("s3") | Err(_) => StorageBackendKind::S3,
            Ok(other) => {
                return Err(ConfigError::Invalid {
                    name: "SILO_STORAGE_BACKEND",
                    value: other.to_owned(),
                })
            }
        };
        let s3_endpoint_url = env::var("SILO_S3_ENDPOINT_URL").ok();
        let backup_bucket =
            env::var("SILO_BACKUP_BUCKET").unwrap_or_else(|_| "silo-backups".to_owned());

        Ok(Self {
            bind_addr,
            platform_database_url,
            tenant_host_conn_base,
            master_key_secret,
            storage_backend,
            s3_endpoint_url,
            backup_bucket,
        })
    }
}

/// Runtime-mutable settings: rate-limit caps, SQL row caps, statement
/// timeout, and the public storage URL operators may want to change
/// without a restart. Readers snapshot the whole struct (cheap `Clone`);
/// writers swap the `Arc` behind a `RwLock` in [`crate::state::AppState`].
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub max_rows_per_query: i64,
    pub admin_sql_statement_timeout_ms: i64,
    pub max_object_size_bytes: u64,
    pub scheduler_max_concurrent: u32,
    pub scheduler_sync_interval: Duration,
    pub rate_limit_per_minute: u32,
    pub public_storage_url: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_rows_per_query: 1000,
            admin_sql_statement_timeout_ms: 30_000,
            max_object_size_bytes: 100 * 1024 * 1024,
            scheduler_max_concurrent: 10,
            scheduler_sync_interval: Duration::from_secs(30),
            rate_limit_per_minute: 600,
            public_storage_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runtime_settings_match_documented_defaults() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.max_rows_per_query, 1000);
        assert_eq!(settings.max_object_size_bytes, 100 * 1024 * 1024);
    }
}
