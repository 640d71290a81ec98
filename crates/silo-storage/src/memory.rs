//! In-memory object-storage backend. Test-only: data never persists.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::{ObjectStore, ObjectSummary, StorageError};

struct Object {
    body: Vec<u8>,
    #[allow(dead_code)]
    content_type: String,
}

/// An [`ObjectStore`] backed entirely by process memory.
///
/// Presigned URLs are synthetic (`mem://<bucket>/<key>?exp=<secs>`) — there
/// is no HTTP server behind them, so this backend is only useful for unit
/// tests that exercise the broker's logic rather than an actual upload.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashSet<String>>,
    objects: Mutex<HashMap<(String, String), Object>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.buckets
            .lock()
            .map_err(|_| StorageError::BucketOp {
                reason: "lock poisoned".to_owned(),
            })?
            .insert(bucket.to_owned());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let has_objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::BucketOp {
                reason: "lock poisoned".to_owned(),
            })?
            .keys()
            .any(|(b, _)| b == bucket);
        if has_objects {
            return Err(StorageError::BucketOp {
                reason: format!("bucket '{bucket}' is not empty"),
            });
        }
        self.buckets
            .lock()
            .map_err(|_| StorageError::BucketOp {
                reason: "lock poisoned".to_owned(),
            })?
            .remove(bucket);
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects
            .lock()
            .map_err(|_| StorageError::Write {
                reason: "lock poisoned".to_owned(),
            })?
            .insert(
                (bucket.to_owned(), key.to_owned()),
                Object {
                    body,
                    content_type: content_type.to_owned(),
                },
            );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .objects
            .lock()
            .map_err(|_| StorageError::Read {
                reason: "lock poisoned".to_owned(),
            })?
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|o| o.body.clone()))
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "mem://{bucket}/{key}?op=put&exp={}",
            expires_in.as_secs()
        ))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "mem://{bucket}/{key}?op=get&exp={}",
            expires_in.as_secs()
        ))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .map_err(|_| StorageError::Delete {
                reason: "lock poisoned".to_owned(),
            })?
            .remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ObjectSummary>, StorageError> {
        let objects = self.objects.lock().map_err(|_| StorageError::List {
            reason: "lock poisoned".to_owned(),
        })?;
        let mut out: Vec<ObjectSummary> = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), o)| ObjectSummary {
                key: k.clone(),
                size: o.body.len() as u64,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store
            .put("b", "a/b.txt", b"hello".to_vec(), "text/plain")
            .await
            .unwrap();
        let got = store.get("b", "a/b.txt").await.unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_bucket() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store.put("b", "private/a", vec![1], "application/octet-stream").await.unwrap();
        store.put("b", "uploads/b", vec![1, 2], "application/octet-stream").await.unwrap();
        store.put("other", "private/a", vec![1], "application/octet-stream").await.unwrap();

        let listed = store.list("b", "private/", 100).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "private/a");
        assert_eq!(listed[0].size, 1);
    }

    #[tokio::test]
    async fn delete_prefix_drains_all_matching_objects() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        for i in 0..5 {
            store
                .put("b", &format!("p/{i}"), vec![0], "application/octet-stream")
                .await
                .unwrap();
        }
        let deleted = store.delete_prefix("b", "p/").await.unwrap();
        assert_eq!(deleted, 5);
        assert!(store.list("b", "p/", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_bucket_fails_when_not_empty() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store.put("b", "x", vec![1], "application/octet-stream").await.unwrap();
        assert!(store.delete_bucket("b").await.is_err());
    }
}
