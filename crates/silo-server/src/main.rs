//! Silo server entry point.
//!
//! Bootstraps the platform database, every `silo-core` subsystem, and the
//! Axum HTTP server with graceful shutdown. Two background workers run
//! alongside the server: the scheduler's sync/dispatch loop and the backup
//! retention sweep, both cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use silo_core::adminsql::AdminSqlExecutor;
use silo_core::backup::BackupEngine;
use silo_core::broker::ObjectStorageBroker;
use silo_core::crud::{CrudCompiler, SchemaCache};
use silo_core::crypto::Crypto;
use silo_core::keys::KeyService;
use silo_core::provision::Provisioner;
use silo_core::router::TenantRouter;
use silo_core::scheduler::Scheduler;
use silo_core::store::Store;

use silo_storage::{MemoryObjectStore, ObjectStore, S3ObjectStore};

use silo_server::actions::{ReqwestJobRunner, ServerPlatformActions};
use silo_server::config::{RuntimeSettings, ServerConfig, StorageBackendKind};
use silo_server::middleware::{api_key_auth, rate_limit};
use silo_server::routes;
use silo_server::state::AppState;

const SCHEMA_SQL: &str = include_str!("../schema.sql");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "silo starting");

    let state = build_app_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_worker_handle = {
        let state = state.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            scheduler_worker(state, &mut rx).await;
        })
    };

    let retention_worker_handle = {
        let state = state.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            retention_worker(state, &mut rx).await;
        })
    };

    let app = build_router(state.clone());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "silo server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), scheduler_worker_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), retention_worker_handle).await;

    state.router.close_all().await;

    info!("silo server stopped");
    Ok(())
}

/// Connect to the platform database, apply the embedded schema, and wire
/// every subsystem into a shared [`AppState`].
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let platform_pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.platform_database_url)
        .await
        .context("failed to connect to the platform database")?;

    apply_schema(&platform_pool)
        .await
        .context("failed to apply platform schema")?;

    let store = Store::new(platform_pool.clone());
    let crypto = Arc::new(Crypto::from_secret(&config.master_key_secret)?);
    let router = Arc::new(TenantRouter::new(store.clone(), Arc::clone(&crypto)));
    let keys = Arc::new(KeyService::new(store.clone()));
    let schema_cache = Arc::new(SchemaCache::new());
    let settings = RuntimeSettings::default();

    let crud = Arc::new(CrudCompiler::new(Arc::clone(&schema_cache)));
    let admin_sql = Arc::new(AdminSqlExecutor::new());

    let object_backend: Arc<dyn ObjectStore> = match config.storage_backend {
        StorageBackendKind::S3 => {
            let force_path_style = config.s3_endpoint_url.is_some();
            Arc::new(S3ObjectStore::new(config.s3_endpoint_url.as_deref(), force_path_style).await)
        }
        StorageBackendKind::Memory => Arc::new(MemoryObjectStore::new()),
    };
    let broker = Arc::new(ObjectStorageBroker::new(Arc::clone(&object_backend), store.clone()));

    let provisioner = Arc::new(Provisioner::new(
        store.clone(),
        Arc::clone(&crypto),
        Arc::clone(&router),
        Arc::clone(&broker),
        Arc::clone(&keys),
    ));

    let backups = Arc::new(BackupEngine::new(
        store.clone(),
        Arc::clone(&crypto),
        Arc::clone(&router),
        object_backend,
        config.backup_bucket.clone(),
        config.platform_database_url.clone(),
    ));

    let platform_actions = Arc::new(ServerPlatformActions::new(
        store.clone(),
        Arc::clone(&crypto),
        Arc::clone(&backups),
    ));
    let http_runner = Arc::new(ReqwestJobRunner);
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        Arc::clone(&crypto),
        settings.scheduler_max_concurrent,
        platform_actions,
        http_runner,
    ));

    Ok(AppState {
        store,
        crypto,
        router,
        keys,
        crud,
        schema_cache,
        admin_sql,
        broker,
        backups,
        provisioner,
        scheduler,
        platform_pool,
        settings: Arc::new(RwLock::new(settings)),
        config: Arc::new(config.clone()),
    })
}

/// Run every non-empty `;`-separated statement in the embedded schema
/// through `execute_ddl` — `CREATE TABLE`/`CREATE INDEX` must not run
/// inside a transaction, and Postgres/sqlx has no true multi-statement
/// execution through a single bound query.
async fn apply_schema(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());
    for statement in SCHEMA_SQL.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        store.execute_ddl(statement).await?;
    }
    Ok(())
}

/// Build the Axum router with all routes and middleware.
fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .nest("/v1/db", routes::public_db::router())
        .nest("/v1/storage", routes::public_storage::router())
        .route_layer(axum_mw::from_fn_with_state(state.clone(), api_key_auth));

    let admin_routes = Router::new()
        .nest("/v1/admin/projects", routes::admin_projects::router())
        .nest("/v1/admin/projects", routes::admin_keys::router())
        .nest("/v1/admin/projects", routes::admin_sql::router())
        .nest("/v1/admin/projects", routes::admin_storage::router())
        .nest("/v1/admin/backups", routes::admin_backups::router())
        .nest("/v1/admin/settings", routes::admin_settings::router())
        .nest("/v1/admin", routes::admin_users::router())
        .nest("/v1/admin/stats", routes::admin_stats::router());

    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-api-key"),
        ]);

    Router::new()
        .nest("/internal", routes::health::router())
        .merge(public_routes)
        .merge(admin_routes)
        .route_layer(axum_mw::from_fn_with_state(state.clone(), rate_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .layer(tower_http::set_header::SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Periodically re-sync enabled jobs and dispatch any that are due.
async fn scheduler_worker(state: AppState, shutdown: &mut watch::Receiver<bool>) {
    let sync_interval = state.settings.read().await.scheduler_sync_interval;
    let mut interval = tokio::time::interval(sync_interval);
    info!("scheduler worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = state.scheduler.sync_jobs().await {
                    warn!(error = %err, "scheduler sync failed");
                    continue;
                }
                let now = chrono::Utc::now();
                for job_id in state.scheduler.active_job_ids().await {
                    if !state.scheduler.is_due(job_id, now).await {
                        continue;
                    }
                    match state.scheduler.dispatch(job_id).await {
                        Ok(Some(outcome)) => {
                            info!(%job_id, succeeded = outcome.succeeded, attempts = outcome.attempts, "job dispatched");
                        }
                        Ok(None) => {
                            info!(%job_id, "job dispatch dropped, at concurrency cap");
                        }
                        Err(err) => {
                            warn!(%job_id, error = %err, "job dispatch failed");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("scheduler worker shutting down");
                return;
            }
        }
    }
}

/// Periodically apply tiered retention and expire legacy `expiresAt` rows
/// across every project.
async fn retention_worker(state: AppState, shutdown: &mut watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    info!("retention worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match state.store.list_project_ids().await {
                    Ok(project_ids) => {
                        for project_id in project_ids {
                            if let Err(err) = state.backups.cleanup_with_retention(project_id).await {
                                warn!(%project_id, error = %err, "retention sweep failed for project");
                            }
                        }
                    }
                    Err(err) => warn!(error = %err, "retention sweep failed to list projects"),
                }
                if let Err(err) = state.backups.cleanup_expired().await {
                    warn!(error = %err, "expired-backup sweep failed");
                }
            }
            _ = shutdown.changed() => {
                info!("retention worker shutting down");
                return;
            }
        }
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
