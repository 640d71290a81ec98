//! API-key generation, validation, rotation, and revocation.

use std::sync::Arc;

use uuid::Uuid;

use crate::crypto::{self, ApiKeyKind};
use crate::models::{ApiKey, ApiKeyType};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no active key matches the supplied credential")]
    NoMatch,
}

/// The project a validated API key resolves to, plus the privilege implied
/// by its type.
#[derive(Debug, Clone, Copy)]
pub struct ProjectContext {
    pub project_id: Uuid,
    pub key_id: Uuid,
    pub key_type: ApiKeyType,
}

pub struct KeyService {
    store: Store,
}

impl KeyService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve a plaintext API key to its project, or `Err(NoMatch)`.
    ///
    /// Hashes `plaintext` once, then scans every active key and compares in
    /// constant time. This is a deliberate linear scan, not an oversight: an
    /// index lookup on the hash would let timing leak which prefix of the
    /// hash matched a stored row. Every candidate is compared regardless of
    /// whether an earlier one already matched.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Store`] if the active-key scan fails, or
    /// [`KeyError::NoMatch`] if no active key's hash compares equal.
    pub async fn validate(&self, plaintext: &str) -> Result<ProjectContext, KeyError> {
        let hash = crypto::hash_hex(plaintext);
        let candidates = self.store.list_active_api_keys().await?;

        let mut found: Option<&ApiKey> = None;
        for candidate in &candidates {
            if crypto::hashes_equal(&candidate.hash, &hash) {
                found = found.or(Some(candidate));
            }
        }
        found
            .map(|key| ProjectContext {
                project_id: key.project_id,
                key_id: key.id,
                key_type: key.kind,
            })
            .ok_or(KeyError::NoMatch)
    }

    /// Generate, hash, and persist a new key for `project_id`. Returns the
    /// plaintext — it is never recoverable again.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Store`] if the insert fails.
    pub async fn issue(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        project_id: Uuid,
        kind: ApiKeyType,
    ) -> Result<(ApiKey, String), KeyError> {
        let api_kind = match kind {
            ApiKeyType::Publishable => ApiKeyKind::Publishable,
            ApiKeyType::Secret => ApiKeyKind::Secret,
        };
        let plaintext = crypto::generate_api_key(api_kind);
        let hash = crypto::hash_hex(&plaintext);
        let prefix: String = plaintext.chars().take(8).collect();
        let row = self
            .store
            .insert_api_key(tx, Uuid::new_v4(), project_id, kind, &hash, &prefix)
            .await?;
        Ok((row, plaintext))
    }

    /// Transactionally revoke every current active key of `kind` for
    /// `project_id` and issue a replacement.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Store`] if either step fails; the whole operation
    /// rolls back atomically.
    pub async fn rotate(
        &self,
        project_id: Uuid,
        kind: ApiKeyType,
    ) -> Result<(ApiKey, String), KeyError> {
        let mut tx = self.store.begin().await?;
        self.store
            .revoke_active_keys_of_type(&mut tx, project_id, kind)
            .await?;
        let (row, plaintext) = self.issue(&mut tx, project_id, kind).await?;
        self.store.commit(tx).await?;
        Ok((row, plaintext))
    }

    /// Revoke a single key iff it is currently active.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Store`] if the update fails.
    pub async fn revoke(&self, key_id: Uuid) -> Result<(), KeyError> {
        self.store.revoke_api_key(key_id).await?;
        Ok(())
    }
}

/// Convenience wrapper so call sites can share one service behind an `Arc`.
pub type SharedKeyService = Arc<KeyService>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_api_key, hash_hex, hashes_equal, ApiKeyKind};
    use chrono::Utc;

    fn sample_key(hash: &str, project_id: Uuid) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            project_id,
            kind: ApiKeyType::Secret,
            hash: hash.to_owned(),
            prefix: "sk_abcd".to_owned(),
            created_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
        }
    }

    #[test]
    fn active_key_expiry_semantics() {
        let mut key = sample_key("h", Uuid::new_v4());
        assert!(key.is_active(Utc::now()));
        key.revoked_at = Some(Utc::now());
        assert!(!key.is_active(Utc::now()));
    }

    #[test]
    fn constant_time_scan_finds_the_matching_candidate_without_short_circuit() {
        let plaintext = generate_api_key(ApiKeyKind::Secret);
        let target_hash = hash_hex(&plaintext);
        let project_id = Uuid::new_v4();

        let decoys: Vec<ApiKey> = (0..5)
            .map(|_| sample_key(&hash_hex(&generate_api_key(ApiKeyKind::Secret)), Uuid::new_v4()))
            .collect();
        let mut candidates = decoys;
        candidates.push(sample_key(&target_hash, project_id));

        let mut found = None;
        for candidate in &candidates {
            if hashes_equal(&candidate.hash, &target_hash) {
                found = found.or(Some(candidate));
            }
        }
        assert_eq!(found.unwrap().project_id, project_id);
    }
}
