//! Revocation store: shared registry of invalidated token identifiers.
//!
//! Consulted synchronously on every validated request, so the interface is
//! deliberately narrow and lookups must be cheap. The Redis implementation is
//! the shared, centrally-accessible store for multi-worker deployments; the
//! in-memory implementation backs tests and single-worker development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::time::Duration;

use crate::services::ServiceError;

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record an id as revoked. Idempotent: revoking an already-revoked id is
    /// a no-op with the same observable effect. `ttl_seconds` should cover the
    /// token's remaining natural lifetime; after that the expiry check rejects
    /// the token on its own and the entry may be garbage-collected.
    async fn revoke(&self, id: &str, ttl_seconds: i64, reason: &str) -> Result<(), ServiceError>;

    /// Check whether an id has been revoked. An error here means non-revocation
    /// could not be confirmed; callers must fail closed.
    async fn is_revoked(&self, id: &str) -> Result<bool, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

/// Redis-backed revocation store. Every operation is wrapped in a timeout;
/// a store that cannot answer in time is reported as an error so the
/// validator denies rather than optimistically allows.
#[derive(Clone)]
pub struct RedisRevocationStore {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl RedisRevocationStore {
    pub async fn new(url: &str, op_timeout: Duration) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self {
            manager,
            op_timeout,
        })
    }

    fn key(id: &str) -> String {
        format!("revoked:{}", id)
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, id: &str, ttl_seconds: i64, reason: &str) -> Result<(), ServiceError> {
        if ttl_seconds <= 0 {
            // Already past natural expiry; the expiry check rejects it anyway.
            return Ok(());
        }

        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::key(id))
            .arg(reason)
            .arg("EX")
            .arg(ttl_seconds);

        tokio::time::timeout(self.op_timeout, cmd.query_async::<_, ()>(&mut conn))
            .await
            .map_err(|_| ServiceError::RevocationUnavailable)?
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to write revocation entry");
                ServiceError::RevocationUnavailable
            })
    }

    async fn is_revoked(&self, id: &str) -> Result<bool, ServiceError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(Self::key(id));

        tokio::time::timeout(self.op_timeout, cmd.query_async::<_, bool>(&mut conn))
            .await
            .map_err(|_| ServiceError::RevocationUnavailable)?
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to check revocation entry");
                ServiceError::RevocationUnavailable
            })
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        let cmd = redis::cmd("PING");

        tokio::time::timeout(self.op_timeout, cmd.query_async::<_, ()>(&mut conn))
            .await
            .map_err(|_| ServiceError::RevocationUnavailable)?
            .map_err(|_| ServiceError::RevocationUnavailable)
    }
}

/// In-memory revocation store with per-entry expiry.
#[derive(Default)]
pub struct InMemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn revoke(&self, id: &str, ttl_seconds: i64, _reason: &str) -> Result<(), ServiceError> {
        if ttl_seconds <= 0 {
            return Ok(());
        }
        self.entries.insert(
            id.to_string(),
            Utc::now() + chrono::Duration::seconds(ttl_seconds),
        );
        Ok(())
    }

    async fn is_revoked(&self, id: &str) -> Result<bool, ServiceError> {
        let stale = match self.entries.get(id) {
            Some(expiry) => {
                if *expiry > Utc::now() {
                    return Ok(true);
                }
                true
            }
            None => false,
        };
        if stale {
            // Past natural expiry; garbage-collect the entry.
            self.entries.remove(id);
        }
        Ok(false)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Revocation store double that always fails, for exercising the fail-closed
/// path in tests.
#[derive(Default)]
pub struct UnavailableRevocationStore;

#[async_trait]
impl RevocationStore for UnavailableRevocationStore {
    async fn revoke(&self, _id: &str, _ttl: i64, _reason: &str) -> Result<(), ServiceError> {
        Err(ServiceError::RevocationUnavailable)
    }

    async fn is_revoked(&self, _id: &str) -> Result<bool, ServiceError> {
        Err(ServiceError::RevocationUnavailable)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Err(ServiceError::RevocationUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_keys_are_namespaced() {
        assert_eq!(RedisRevocationStore::key("jti-1"), "revoked:jti-1");
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = InMemoryRevocationStore::new();

        store.revoke("jti-1", 600, "logout").await.unwrap();
        store.revoke("jti-1", 600, "logout").await.unwrap();

        assert!(store.is_revoked("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn unrevoked_id_reads_false() {
        let store = InMemoryRevocationStore::new();
        assert!(!store.is_revoked("jti-unknown").await.unwrap());
    }

    #[tokio::test]
    async fn entry_expires_with_token_lifetime() {
        let store = InMemoryRevocationStore::new();

        // Zero remaining lifetime: the expiry check already rejects the token,
        // so no entry is needed.
        store.revoke("jti-2", 0, "logout").await.unwrap();
        assert!(!store.is_revoked("jti-2").await.unwrap());
    }
}
