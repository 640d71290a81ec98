//! S3-compatible [`ObjectStore`] implementation.
//!
//! Works against AWS S3 itself or any S3-compatible endpoint (MinIO, R2,
//! etc.) by honoring the standard `AWS_ENDPOINT_URL`/`AWS_REGION` env vars
//! through `aws-config`'s default credential and region chains.

use std::time::Duration;

use aws_sdk_s3::config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::{ObjectStore, ObjectSummary, StorageError};

/// Production [`ObjectStore`] backed by an S3-compatible bucket.
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from the ambient AWS config (environment variables,
    /// shared credentials file, or instance metadata, in that order).
    ///
    /// `endpoint_url` overrides the default AWS endpoint resolution — set it
    /// to point at a self-hosted S3-compatible service. `force_path_style`
    /// is required by most non-AWS S3-compatible backends.
    pub async fn new(endpoint_url: Option<&str>, force_path_style: bool) -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(force_path_style);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url);
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Build a client pinned to an explicit region, bypassing the default
    /// region chain. Useful in tests or single-region deployments that want
    /// to avoid surprises from an ambient `AWS_REGION`.
    pub async fn with_region(region: impl Into<String>, endpoint_url: Option<&str>) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url);
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let svc = err.as_service_error();
                if svc.is_some_and(|e| e.is_bucket_already_owned_by_you()) {
                    Ok(())
                } else {
                    Err(StorageError::BucketOp {
                        reason: err.to_string(),
                    })
                }
            }
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| StorageError::BucketOp {
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| StorageError::Write {
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let resp = self.client.get_object().bucket(bucket).key(key).send().await;
        let output = match resp {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key())
                {
                    return Ok(None);
                }
                return Err(StorageError::Read {
                    reason: err.to_string(),
                });
            }
        };
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Read {
                reason: err.to_string(),
            })?
            .into_bytes();
        Ok(Some(bytes.to_vec()))
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let config = PresigningConfig::expires_in(expires_in).map_err(|err| StorageError::Presign {
            reason: err.to_string(),
        })?;
        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .presigned(config)
            .await
            .map_err(|err| StorageError::Presign {
                reason: err.to_string(),
            })?;
        Ok(presigned.uri().to_owned())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let config = PresigningConfig::expires_in(expires_in).map_err(|err| StorageError::Presign {
            reason: err.to_string(),
        })?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|err| StorageError::Presign {
                reason: err.to_string(),
            })?;
        Ok(presigned.uri().to_owned())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::Delete {
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ObjectSummary>, StorageError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|err| StorageError::List {
                reason: err.to_string(),
            })?;
        Ok(resp
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_owned();
                let size = u64::try_from(obj.size().unwrap_or(0)).unwrap_or(0);
                Some(ObjectSummary { key, size })
            })
            .collect())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, StorageError> {
        let mut deleted = 0u64;
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|err| StorageError::List {
                reason: err.to_string(),
            })?;
            let keys: Vec<String> = resp
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(ToOwned::to_owned))
                .collect();
            if keys.is_empty() {
                return Ok(deleted);
            }
            for key in &keys {
                self.delete(bucket, key).await?;
                deleted += 1;
            }
            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(ToOwned::to_owned);
            } else {
                return Ok(deleted);
            }
        }
    }
}
