//! Object-storage backend abstraction for Silo.
//!
//! This crate defines [`ObjectStore`] — a pure bucket/object storage
//! interface that knows nothing about projects, logical buckets, or file
//! metadata. The storage broker in `silo-core` wraps an `ObjectStore` to add
//! per-project namespacing and presigned-URL policy.
//!
//! Two implementations are provided:
//!
//! - [`S3ObjectStore`] — production default, speaks the S3 API and works
//!   against any S3-compatible endpoint (feature `s3-backend`).
//! - [`MemoryObjectStore`] — in-memory, for tests only.

mod error;
mod memory;
#[cfg(feature = "s3-backend")]
mod s3;

pub use error::StorageError;
pub use memory::MemoryObjectStore;
#[cfg(feature = "s3-backend")]
pub use s3::S3ObjectStore;

use std::time::Duration;

/// A single object returned by [`ObjectStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// A pluggable bucket/object storage backend.
///
/// Bucket names and object keys are opaque UTF-8 strings. Implementations
/// must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Create a physical bucket. Idempotent — creating an existing bucket is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketOp`] if the backend rejects creation.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Delete a physical bucket. The bucket must be empty; callers drain it
    /// with [`ObjectStore::delete_prefix`] first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketOp`] if the backend rejects deletion
    /// (including a non-empty bucket).
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Upload an object directly (used for server-side writes such as
    /// backup archives — end-user uploads go through a presigned URL
    /// instead).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend rejects the write.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Download an object's full contents.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the backend fails for a reason
    /// other than a missing key.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Issue a time-limited URL an external client can `PUT` an object to.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Presign`] if URL generation fails.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    /// Issue a time-limited URL an external client can `GET` an object from.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Presign`] if URL generation fails.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    /// Delete a single object. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the backend fails.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// List up to `limit` objects under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the backend fails.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ObjectSummary>, StorageError>;

    /// Delete every object under `prefix`, paginating through
    /// [`ObjectStore::list`] until nothing remains.
    ///
    /// Default implementation in terms of `list`/`delete`; backends with a
    /// native bulk-delete API may override this for efficiency.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] encountered; objects deleted
    /// before the failing call remain deleted (best-effort, not atomic).
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, StorageError> {
        let mut deleted = 0u64;
        loop {
            let batch = self.list(bucket, prefix, 1000).await?;
            if batch.is_empty() {
                return Ok(deleted);
            }
            for obj in &batch {
                self.delete(bucket, &obj.key).await?;
                deleted += 1;
            }
        }
    }
}
