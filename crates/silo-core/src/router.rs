//! Tenant connection router.
//!
//! The single chokepoint for tenant database access. Holds a cache of
//! per-project connection pools at two privilege tiers (owner/app), built
//! lazily on first use by decrypting the stored credential via
//! [`crate::crypto::Crypto`]. Higher layers always name the tier explicitly —
//! there is no "default" pool.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto::Crypto;
use crate::models::Principal;
use crate::store::{Store, StoreError};

const MAX_TENANT_POOL_CONNECTIONS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("failed to open tenant pool: {reason}")]
    PoolOpen { reason: String },
}

struct TenantPools {
    owner: PgPool,
    app: PgPool,
}

/// Caches `(project, principal)` connection pools and is the only
/// component that opens a connection to a tenant database.
pub struct TenantRouter {
    store: Store,
    crypto: Arc<Crypto>,
    pools: RwLock<HashMap<Uuid, TenantPools>>,
}

impl TenantRouter {
    #[must_use]
    pub fn new(store: Store, crypto: Arc<Crypto>) -> Self {
        Self {
            store,
            crypto,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch (creating if absent) the pool for `(project, principal)`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Store`] if the credential row is missing,
    /// [`RouterError::Crypto`] if it fails to decrypt, or
    /// [`RouterError::PoolOpen`] if the resulting connection string cannot
    /// be connected to.
    pub async fn pool(&self, project_id: Uuid, principal: Principal) -> Result<PgPool, RouterError> {
        {
            let pools = self.pools.read().await;
            if let Some(entry) = pools.get(&project_id) {
                return Ok(match principal {
                    Principal::Owner => entry.owner.clone(),
                    Principal::App => entry.app.clone(),
                });
            }
        }

        let owner_conn = self.decrypt_credential(project_id, Principal::Owner).await?;
        let app_conn = self.decrypt_credential(project_id, Principal::App).await?;

        let owner_pool = PgPoolOptions::new()
            .max_connections(MAX_TENANT_POOL_CONNECTIONS)
            .connect(&owner_conn)
            .await
            .map_err(|err| RouterError::PoolOpen {
                reason: err.to_string(),
            })?;
        let app_pool = PgPoolOptions::new()
            .max_connections(MAX_TENANT_POOL_CONNECTIONS)
            .connect(&app_conn)
            .await
            .map_err(|err| RouterError::PoolOpen {
                reason: err.to_string(),
            })?;

        let mut pools = self.pools.write().await;
        let entry = pools.entry(project_id).or_insert(TenantPools {
            owner: owner_pool,
            app: app_pool,
        });
        Ok(match principal {
            Principal::Owner => entry.owner.clone(),
            Principal::App => entry.app.clone(),
        })
    }

    async fn decrypt_credential(
        &self,
        project_id: Uuid,
        principal: Principal,
    ) -> Result<String, RouterError> {
        let cred = self.store.get_credential(project_id, principal).await?;
        let envelope = crate::crypto::Envelope {
            ciphertext: cred.ciphertext,
            iv: cred.iv,
        };
        Ok(self.crypto.decrypt_to_string(&envelope)?)
    }

    /// Drain and remove the cached pools for `project_id`. Called on project
    /// deletion.
    pub async fn close(&self, project_id: Uuid) {
        let entry = self.pools.write().await.remove(&project_id);
        if let Some(entry) = entry {
            entry.owner.close().await;
            entry.app.close().await;
        }
    }

    /// Drain every cached pool. Called on server shutdown.
    pub async fn close_all(&self) {
        let mut pools = self.pools.write().await;
        for (_, entry) in pools.drain() {
            entry.owner.close().await;
            entry.app.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_on_unknown_project_is_a_noop() {
        let crypto = Arc::new(Crypto::from_secret(&"x".repeat(32)).unwrap());
        // A Store needs a live pool to construct meaningfully; this test only
        // exercises the cache-miss path of `close`, which never touches it.
        // Constructing a PgPool lazily (no connection attempt) is sufficient.
        let pool = PgPool::connect_lazy("postgres://localhost/does-not-matter").unwrap();
        let router = TenantRouter::new(Store::new(pool), crypto);
        router.close(Uuid::new_v4()).await;
    }
}
