//! Project provisioning: create/teardown of a project's isolated database,
//! two privilege principals, encrypted credentials, initial API keys, and
//! object namespace.
//!
//! The ordering in [`Provisioner::create`] is load-bearing: DDL runs
//! outside any transaction (Postgres cannot run `CREATE DATABASE` inside
//! one), then the platform-store transaction is the only place multiple
//! rows are inserted atomically.

use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use crate::broker::{BrokerError, ObjectStorageBroker};
use crate::crypto::{Crypto, CryptoError};
use crate::keys::KeyService;
use crate::models::{ApiKeyType, Principal, Project};
use crate::router::TenantRouter;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("failed to provision tenant database: {reason}")]
    DatabaseSetup { reason: String },

    #[error("key service error: {0}")]
    Key(#[from] crate::keys::KeyError),
}

pub struct ProvisionedProject {
    pub project: Project,
    pub publishable_key: String,
    pub secret_key: String,
}

pub struct Provisioner {
    store: Store,
    crypto: Arc<Crypto>,
    router: Arc<TenantRouter>,
    broker: Arc<ObjectStorageBroker>,
    key_service: Arc<KeyService>,
}

fn db_name_for(project_id: Uuid) -> String {
    format!("proj_{}", project_id.simple())
}

fn role_names_for(db_name: &str) -> (String, String) {
    (format!("{db_name}_owner"), format!("{db_name}_app"))
}

fn connection_string(host_conn_base: &str, db_name: &str, role: &str, password: &str) -> String {
    // host_conn_base looks like "postgres://host:5432"; this composes the
    // per-role connection descriptor that gets encrypted and stored.
    format!("{host_conn_base}/{db_name}?user={role}&password={password}")
}

impl Provisioner {
    #[must_use]
    pub fn new(
        store: Store,
        crypto: Arc<Crypto>,
        router: Arc<TenantRouter>,
        broker: Arc<ObjectStorageBroker>,
        key_service: Arc<KeyService>,
    ) -> Self {
        Self {
            store,
            crypto,
            router,
            broker,
            key_service,
        }
    }

    /// Provision a new project end-to-end. On any failure after database
    /// creation, attempts idempotent cleanup (`DROP DATABASE IF EXISTS`,
    /// `DROP ROLE IF EXISTS`) and surfaces the original error; plaintext
    /// keys are only ever returned on full success.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] for any step's failure, after attempting
    /// cleanup.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        host_conn_base: &str,
    ) -> Result<ProvisionedProject, ProvisionError> {
        let project_id = Uuid::new_v4();
        let slug = slugify(name, project_id);
        let db_name = db_name_for(project_id);
        let (owner_role, app_role) = role_names_for(&db_name);
        let owner_password = random_password();
        let app_password = random_password();

        if let Err(err) = self
            .create_database_and_roles(&db_name, &owner_role, &app_role, &owner_password, &app_password)
            .await
        {
            self.cleanup_database(&db_name, &owner_role, &app_role).await;
            return Err(err);
        }

        if let Err(err) = self
            .grant_schema_and_default_privileges(
                host_conn_base,
                &db_name,
                &owner_role,
                &app_role,
                &owner_password,
            )
            .await
        {
            self.cleanup_database(&db_name, &owner_role, &app_role).await;
            return Err(err);
        }

        let result = self
            .finish_provisioning(
                project_id,
                name,
                &slug,
                description,
                host_conn_base,
                &db_name,
                &owner_role,
                &app_role,
                &owner_password,
                &app_password,
            )
            .await;

        match result {
            Ok(provisioned) => Ok(provisioned),
            Err(err) => {
                self.cleanup_database(&db_name, &owner_role, &app_role).await;
                Err(err)
            }
        }
    }

    async fn create_database_and_roles(
        &self,
        db_name: &str,
        owner_role: &str,
        app_role: &str,
        owner_password: &str,
        app_password: &str,
    ) -> Result<(), ProvisionError> {
        self.store
            .execute_ddl(&format!("CREATE DATABASE \"{db_name}\""))
            .await
            .map_err(|e| ProvisionError::DatabaseSetup {
                reason: e.to_string(),
            })?;
        self.store
            .execute_ddl(&format!(
                "CREATE ROLE \"{owner_role}\" WITH LOGIN PASSWORD '{owner_password}'"
            ))
            .await
            .map_err(|e| ProvisionError::DatabaseSetup {
                reason: e.to_string(),
            })?;
        self.store
            .execute_ddl(&format!(
                "CREATE ROLE \"{app_role}\" WITH LOGIN PASSWORD '{app_password}'"
            ))
            .await
            .map_err(|e| ProvisionError::DatabaseSetup {
                reason: e.to_string(),
            })?;
        self.store
            .execute_ddl(&format!(
                "GRANT ALL PRIVILEGES ON DATABASE \"{db_name}\" TO \"{owner_role}\""
            ))
            .await
            .map_err(|e| ProvisionError::DatabaseSetup {
                reason: e.to_string(),
            })?;
        self.store
            .execute_ddl(&format!("GRANT CONNECT ON DATABASE \"{db_name}\" TO \"{app_role}\""))
            .await
            .map_err(|e| ProvisionError::DatabaseSetup {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn grant_schema_and_default_privileges(
        &self,
        host_conn_base: &str,
        db_name: &str,
        owner_role: &str,
        app_role: &str,
        owner_password: &str,
    ) -> Result<(), ProvisionError> {
        let admin_conn = connection_string(host_conn_base, db_name, owner_role, owner_password);
        let pool = sqlx::PgPool::connect(&admin_conn)
            .await
            .map_err(|e| ProvisionError::DatabaseSetup {
                reason: e.to_string(),
            })?;

        sqlx::query(&format!("GRANT ALL ON SCHEMA public TO \"{owner_role}\""))
            .execute(&pool)
            .await
            .map_err(|e| ProvisionError::DatabaseSetup {
                reason: e.to_string(),
            })?;
        sqlx::query(&format!(
            "ALTER DEFAULT PRIVILEGES FOR ROLE \"{owner_role}\" IN SCHEMA public \
             GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO \"{app_role}\""
        ))
        .execute(&pool)
        .await
        .map_err(|e| ProvisionError::DatabaseSetup {
            reason: e.to_string(),
        })?;
        sqlx::query(&format!(
            "ALTER DEFAULT PRIVILEGES FOR ROLE \"{owner_role}\" IN SCHEMA public \
             GRANT USAGE, SELECT ON SEQUENCES TO \"{app_role}\""
        ))
        .execute(&pool)
        .await
        .map_err(|e| ProvisionError::DatabaseSetup {
            reason: e.to_string(),
        })?;

        pool.close().await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_provisioning(
        &self,
        project_id: Uuid,
        name: &str,
        slug: &str,
        description: Option<&str>,
        host_conn_base: &str,
        db_name: &str,
        owner_role: &str,
        app_role: &str,
        owner_password: &str,
        app_password: &str,
    ) -> Result<ProvisionedProject, ProvisionError> {
        let owner_conn = connection_string(host_conn_base, db_name, owner_role, owner_password);
        let app_conn = connection_string(host_conn_base, db_name, app_role, app_password);
        let owner_envelope = self.crypto.encrypt(owner_conn.as_bytes())?;
        let app_envelope = self.crypto.encrypt(app_conn.as_bytes())?;

        let mut tx = self.store.begin().await?;
        let project = self
            .store
            .insert_project(&mut tx, project_id, name, slug, description)
            .await?;
        self.store
            .insert_credential(
                &mut tx,
                project_id,
                Principal::Owner,
                &owner_envelope.ciphertext,
                &owner_envelope.iv,
            )
            .await?;
        self.store
            .insert_credential(
                &mut tx,
                project_id,
                Principal::App,
                &app_envelope.ciphertext,
                &app_envelope.iv,
            )
            .await?;
        let (_, publishable_key) = self
            .key_service
            .issue(&mut tx, project_id, ApiKeyType::Publishable)
            .await?;
        let (_, secret_key) = self
            .key_service
            .issue(&mut tx, project_id, ApiKeyType::Secret)
            .await?;
        self.store
            .insert_bucket(&mut tx, Uuid::new_v4(), project_id, "private")
            .await?;
        self.store
            .insert_bucket(&mut tx, Uuid::new_v4(), project_id, "uploads")
            .await?;
        self.store.commit(tx).await?;

        self.broker.create_project_namespace(project_id).await?;

        Ok(ProvisionedProject {
            project,
            publishable_key,
            secret_key,
        })
    }

    async fn cleanup_database(&self, db_name: &str, owner_role: &str, app_role: &str) {
        if let Err(err) = self
            .store
            .execute_ddl(&format!("DROP DATABASE IF EXISTS \"{db_name}\""))
            .await
        {
            error!(%db_name, error = %err, "provisioning cleanup: failed to drop database");
        }
        if let Err(err) = self
            .store
            .execute_ddl(&format!("DROP ROLE IF EXISTS \"{owner_role}\""))
            .await
        {
            warn!(%owner_role, error = %err, "provisioning cleanup: failed to drop owner role");
        }
        if let Err(err) = self
            .store
            .execute_ddl(&format!("DROP ROLE IF EXISTS \"{app_role}\""))
            .await
        {
            warn!(%app_role, error = %err, "provisioning cleanup: failed to drop app role");
        }
    }

    /// Tear down a project: close its tenant pools, delete platform rows in
    /// one transaction, then outside the transaction drop the database,
    /// drop the two roles, and delete the (drained) physical bucket.
    /// Cleanup failures are logged, not re-raised — they are reported to
    /// the operator via audit instead.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Store`] if the row-deletion transaction
    /// fails; DDL and bucket-teardown failures after that point are
    /// swallowed and logged.
    pub async fn delete(&self, project_id: Uuid) -> Result<(), ProvisionError> {
        self.router.close(project_id).await;

        let mut tx = self.store.begin().await?;
        self.store.delete_project_row(&mut tx, project_id).await?;
        self.store.commit(tx).await?;

        let db_name = db_name_for(project_id);
        let (owner_role, app_role) = role_names_for(&db_name);

        if let Err(err) = self
            .store
            .execute_ddl(&format!("DROP DATABASE IF EXISTS \"{db_name}\""))
            .await
        {
            error!(%db_name, error = %err, "delete: failed to drop tenant database");
        }
        if let Err(err) = self
            .store
            .execute_ddl(&format!("DROP ROLE IF EXISTS \"{owner_role}\""))
            .await
        {
            warn!(%owner_role, error = %err, "delete: failed to drop owner role");
        }
        if let Err(err) = self
            .store
            .execute_ddl(&format!("DROP ROLE IF EXISTS \"{app_role}\""))
            .await
        {
            warn!(%app_role, error = %err, "delete: failed to drop app role");
        }
        if let Err(err) = self.broker.destroy_project_namespace(project_id).await {
            warn!(project_id = %project_id, error = %err, "delete: failed to destroy object namespace");
        }

        Ok(())
    }
}

fn slugify(name: &str, project_id: Uuid) -> String {
    let base: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = base.trim_matches('-');
    format!("{trimmed}-{}", &project_id.simple().to_string()[..8])
}

fn random_password() -> String {
    hex::encode(crate::crypto::random_bytes(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_name_is_dash_free_and_prefixed() {
        let id = Uuid::new_v4();
        let name = db_name_for(id);
        assert!(name.starts_with("proj_"));
        assert!(!name.contains('-'));
    }

    #[test]
    fn role_names_derive_from_db_name() {
        let (owner, app) = role_names_for("proj_abc123");
        assert_eq!(owner, "proj_abc123_owner");
        assert_eq!(app, "proj_abc123_app");
    }

    #[test]
    fn slugify_lowercases_and_appends_id_suffix() {
        let id = Uuid::new_v4();
        let slug = slugify("My Cool Project!!", id);
        assert!(slug.starts_with("my-cool-project"));
        assert!(slug.ends_with(&id.simple().to_string()[..8]));
    }

    #[test]
    fn random_passwords_are_independent() {
        assert_ne!(random_password(), random_password());
    }
}
