//! Shared application state threaded through every handler via `axum`'s
//! `State` extractor.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;

use silo_core::adminsql::AdminSqlExecutor;
use silo_core::broker::ObjectStorageBroker;
use silo_core::backup::BackupEngine;
use silo_core::crud::{CrudCompiler, SchemaCache};
use silo_core::crypto::Crypto;
use silo_core::keys::KeyService;
use silo_core::provision::Provisioner;
use silo_core::router::TenantRouter;
use silo_core::scheduler::Scheduler;
use silo_core::store::Store;

use crate::config::{RuntimeSettings, ServerConfig};

/// Every subsystem a handler might need, `Arc`-wrapped so cloning `AppState`
/// is cheap. Runtime-mutable settings live behind their own `RwLock` so a
/// settings update doesn't require touching anything else.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub crypto: Arc<Crypto>,
    pub router: Arc<TenantRouter>,
    pub keys: Arc<KeyService>,
    pub crud: Arc<CrudCompiler>,
    pub schema_cache: Arc<SchemaCache>,
    pub admin_sql: Arc<AdminSqlExecutor>,
    pub broker: Arc<ObjectStorageBroker>,
    pub backups: Arc<BackupEngine>,
    pub provisioner: Arc<Provisioner>,
    pub scheduler: Arc<Scheduler>,
    pub platform_pool: PgPool,
    pub settings: Arc<RwLock<RuntimeSettings>>,
    pub config: Arc<ServerConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
