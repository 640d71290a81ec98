//! Per-concern route modules, one file per admin/public namespace. Each
//! exports `router() -> Router<AppState>`; `main.rs`'s `build_router` nests
//! them under their path prefixes and layers authentication/rate-limiting.

pub mod admin_backups;
pub mod admin_keys;
pub mod admin_projects;
pub mod admin_settings;
pub mod admin_sql;
pub mod admin_stats;
pub mod admin_storage;
pub mod admin_users;
pub mod health;
pub mod public_db;
pub mod public_storage;
