//! Request-scoped extractors and middleware: API-key authentication for the
//! public CRUD/storage surface, the session-identity contract for admin
//! routes, and a thin rate-limit layer.
//!
//! Session authentication itself is an external collaborator — this module
//! only defines the contract ([`SessionIdentity`] extraction from a request
//! extension) a real session-auth service is expected to populate, plus a
//! fake populating it for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Mutex;

use silo_core::keys::ProjectContext;
pub use silo_core::models::SessionIdentity;

use crate::error::AppError;
use crate::state::AppState;

/// Extracted from `x-api-key` by [`api_key_auth`] and stashed as a request
/// extension; route handlers pull it via [`axum::Extension`].
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyIdentity(pub ProjectContext);

/// Middleware for the public CRUD/storage surface: resolves `x-api-key`
/// into a [`ApiKeyIdentity`] via [`silo_core::keys::KeyService::validate`]
/// and injects it into request extensions. Missing or invalid keys reject
/// with 401 before the handler runs.
pub async fn api_key_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?
        .to_owned();

    let context = state.keys.validate(&header).await?;
    request.extensions_mut().insert(ApiKeyIdentity(context));
    Ok(next.run(request).await)
}

/// Extractor for [`SessionIdentity`] — admin routes pull this out of
/// request extensions. The actual population of that extension is the
/// out-of-scope session-authentication collaborator's job; in production
/// it runs as upstream middleware ahead of this router, and in tests a
/// fake populates it directly.
#[async_trait::async_trait]
impl<S> FromRequestParts<S> for SessionIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionIdentity>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// A simple per-key token bucket. `x-api-key`/session user id is the
/// bucketing key; tokens refill continuously at `rate_per_minute`.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    capacity: f64,
    rate_per_minute: f64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate_per_minute: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            capacity: f64::from(rate_per_minute),
            rate_per_minute: f64::from(rate_per_minute),
        }
    }

    /// Attempt to consume one token for `key`. Returns `true` if allowed.
    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = buckets.entry(key.to_owned()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() * (self.rate_per_minute / 60.0);
        bucket.tokens = (bucket.tokens + refill).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate-limit middleware keyed by the caller's API key header (falling
/// back to a constant key for unauthenticated admin traffic, which the
/// session layer is expected to further scope).
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_owned();

    let limiter = {
        let settings = state.settings.read().await;
        RateLimiter::new(settings.rate_limit_per_minute)
    };
    if limiter.check(&key).await {
        Ok(next.run(request).await)
    } else {
        Err(AppError::TooManyRequests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_bucket_allows_burst_up_to_capacity_then_blocks() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.check("k").await);
        assert!(limiter.check("k").await);
        assert!(!limiter.check("k").await);
    }

    #[tokio::test]
    async fn separate_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a").await);
        assert!(limiter.check("b").await);
    }
}
