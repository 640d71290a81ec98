//! Object-storage broker.
//!
//! Wraps a [`silo_storage::ObjectStore`] with project-aware policy: one
//! physical bucket per project (`proj-<id>`), logical buckets as key
//! prefixes, metadata reconciliation in the platform store, and presigned
//! URL issuance. The broker is the only component end-user requests touch
//! for storage — it never exposes the physical bucket name to a caller.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use silo_storage::{ObjectStore, StorageError};

use crate::store::{Store, StoreError};

const DEFAULT_MAX_OBJECT_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(15 * 60);
const VALID_KEY_CHARS: fn(char) -> bool =
    |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.');

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("logical bucket '{0}' does not exist for this project")]
    UnknownLogicalBucket(String),

    #[error("object key contains invalid characters: {0}")]
    InvalidObjectKey(String),

    #[error("object exceeds the configured size cap of {cap} bytes")]
    TooLarge { cap: u64 },

    #[error("storage backend error: {0}")]
    Storage(#[from] StorageError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct PresignedUpload {
    pub object_key: String,
    pub url: String,
    pub expires_in: Duration,
}

pub struct ObjectStorageBroker {
    backend: Arc<dyn ObjectStore>,
    store: Store,
    max_object_size: u64,
}

impl ObjectStorageBroker {
    #[must_use]
    pub fn new(backend: Arc<dyn ObjectStore>, store: Store) -> Self {
        Self {
            backend,
            store,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
        }
    }

    #[must_use]
    pub fn physical_bucket(project_id: Uuid) -> String {
        format!("proj-{}", project_id.simple())
    }

    fn validate_object_key(path: &str) -> Result<(), BrokerError> {
        let valid = !path.is_empty()
            && path.chars().all(VALID_KEY_CHARS)
            && !path.contains("..")
            && !path.starts_with('/');
        if valid {
            Ok(())
        } else {
            Err(BrokerError::InvalidObjectKey(path.to_owned()))
        }
    }

    /// Create the physical bucket backing a newly provisioned project.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if bucket creation fails.
    pub async fn create_project_namespace(&self, project_id: Uuid) -> Result<(), BrokerError> {
        self.backend
            .create_bucket(&Self::physical_bucket(project_id))
            .await?;
        Ok(())
    }

    /// Delete every object in the project's bucket, then the bucket itself.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if listing, deleting, or the final
    /// bucket teardown fails.
    pub async fn destroy_project_namespace(&self, project_id: Uuid) -> Result<(), BrokerError> {
        let bucket = Self::physical_bucket(project_id);
        self.backend.delete_prefix(&bucket, "").await?;
        self.backend.delete_bucket(&bucket).await?;
        Ok(())
    }

    /// Issue a presigned upload URL for `(logical, path)`, validating the
    /// logical bucket exists and the requested size fits under the cap.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownLogicalBucket`], [`BrokerError::InvalidObjectKey`],
    /// [`BrokerError::TooLarge`], or a propagated storage/store error.
    pub async fn presign_upload(
        &self,
        project_id: Uuid,
        logical: &str,
        path: &str,
        content_type: &str,
        max_size: Option<u64>,
    ) -> Result<PresignedUpload, BrokerError> {
        self.store
            .get_bucket(project_id, logical)
            .await
            .map_err(|_| BrokerError::UnknownLogicalBucket(logical.to_owned()))?;
        Self::validate_object_key(path)?;

        if let Some(requested) = max_size {
            if requested > self.max_object_size {
                return Err(BrokerError::TooLarge {
                    cap: self.max_object_size,
                });
            }
        }

        let object_key = format!("{logical}/{path}");
        let bucket = Self::physical_bucket(project_id);
        let url = self
            .backend
            .presign_put(&bucket, &object_key, content_type, DEFAULT_PRESIGN_TTL)
            .await?;

        self.store
            .upsert_file_metadata(project_id, logical, &object_key, content_type, 0)
            .await?;

        Ok(PresignedUpload {
            object_key,
            url,
            expires_in: DEFAULT_PRESIGN_TTL,
        })
    }

    /// Issue a presigned download URL. Does not list — callers must already
    /// know the object key.
    ///
    /// # Errors
    ///
    /// Returns a propagated storage error if presigning fails.
    pub async fn presign_download(
        &self,
        project_id: Uuid,
        object_key: &str,
    ) -> Result<String, BrokerError> {
        let bucket = Self::physical_bucket(project_id);
        Ok(self
            .backend
            .presign_get(&bucket, object_key, DEFAULT_PRESIGN_TTL)
            .await?)
    }

    /// List objects under a logical bucket prefix. Reserved for callers
    /// holding secret-tier authorization — the broker itself does not
    /// enforce that; it is the caller's responsibility to check before
    /// invoking this.
    ///
    /// # Errors
    ///
    /// Returns a propagated storage error.
    pub async fn list(
        &self,
        project_id: Uuid,
        logical: &str,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<silo_storage::ObjectSummary>, BrokerError> {
        let bucket = Self::physical_bucket(project_id);
        let full_prefix = match prefix {
            Some(p) => format!("{logical}/{p}"),
            None => format!("{logical}/"),
        };
        Ok(self
            .backend
            .list(&bucket, &full_prefix, limit.min(1000))
            .await?)
    }

    /// Delete an object and its metadata row.
    ///
    /// # Errors
    ///
    /// Returns a propagated storage/store error.
    pub async fn delete(&self, project_id: Uuid, object_key: &str) -> Result<(), BrokerError> {
        let bucket = Self::physical_bucket(project_id);
        self.backend.delete(&bucket, object_key).await?;
        self.store.delete_file_metadata(project_id, object_key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_bucket_name_is_deterministic_and_dash_free_suffix() {
        let id = Uuid::new_v4();
        let name = ObjectStorageBroker::physical_bucket(id);
        assert!(name.starts_with("proj-"));
        assert!(!name["proj-".len()..].contains('-'));
    }

    #[test]
    fn object_key_validation_rejects_path_traversal_characters() {
        assert!(ObjectStorageBroker::validate_object_key("uploads/a.png").is_ok());
        assert!(ObjectStorageBroker::validate_object_key("../etc/passwd").is_err());
        assert!(ObjectStorageBroker::validate_object_key("a b").is_err());
        assert!(ObjectStorageBroker::validate_object_key("").is_err());
    }
}
