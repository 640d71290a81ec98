//! Error type for object-storage backends.

/// Errors from an [`crate::ObjectStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested bucket does not exist.
    #[error("bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    /// The requested object does not exist.
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// The backend rejected the read.
    #[error("storage read failed: {reason}")]
    Read { reason: String },

    /// The backend rejected the write.
    #[error("storage write failed: {reason}")]
    Write { reason: String },

    /// The backend rejected the delete.
    #[error("storage delete failed: {reason}")]
    Delete { reason: String },

    /// The backend rejected the list operation.
    #[error("storage list failed: {reason}")]
    List { reason: String },

    /// Presigned URL generation failed.
    #[error("presign failed: {reason}")]
    Presign { reason: String },

    /// Bucket creation or deletion failed.
    #[error("bucket operation failed: {reason}")]
    BucketOp { reason: String },
}
