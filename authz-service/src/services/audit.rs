//! Audit logging: append-only record of auth-relevant events.
//!
//! A failed write never fails an otherwise-successful request. Authentication
//! failures are still recorded best-effort: when the primary sink is degraded
//! they fall back to the structured log stream as a secondary channel.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::sync::{Arc, Mutex};

use crate::models::AuditLogEntry;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), anyhow::Error>;
}

/// Postgres-backed primary sink.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (entry_id, principal_id, action, outcome, ip_address, detail, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.principal_id)
        .bind(&entry.action)
        .bind(&entry.outcome)
        .bind(&entry.ip_address)
        .bind(&entry.detail)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory sink for tests and local development.
#[derive(Default)]
pub struct InMemoryAuditSink {
    pub entries: Mutex<Vec<AuditLogEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().expect("audit mutex").clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit mutex poisoned: {e}"))?
            .push(entry.clone());
        Ok(())
    }
}

/// Sink that always fails, for exercising the fallback channel in tests.
#[derive(Default)]
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn append(&self, _entry: &AuditLogEntry) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("audit sink unavailable"))
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record an event without blocking the request path.
    pub fn record(&self, entry: AuditLogEntry) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.append(&entry).await {
                tracing::error!(
                    error = %e,
                    action = %entry.action,
                    "Failed to write audit log entry"
                );
            }
        });
    }

    /// Record an authentication/authorization failure. Awaited so the entry is
    /// durable before the rejection is returned; a degraded primary sink falls
    /// back to the log stream.
    pub async fn record_failure(&self, entry: AuditLogEntry) {
        if let Err(e) = self.sink.append(&entry).await {
            tracing::warn!(
                error = %e,
                principal_id = ?entry.principal_id,
                action = %entry.action,
                outcome = %entry.outcome,
                ip_address = %entry.ip_address,
                detail = ?entry.detail,
                "Audit sink degraded; failure recorded to log stream only"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditOutcome;

    #[tokio::test]
    async fn record_failure_writes_to_primary_sink() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());

        logger
            .record_failure(
                AuditLogEntry::new(None, "login", AuditOutcome::Denied, "10.0.0.1")
                    .with_detail("invalid_credentials"),
            )
            .await;

        let entries = sink.recorded();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "login");
        assert_eq!(entries[0].outcome, "denied");
    }

    #[tokio::test]
    async fn degraded_sink_does_not_propagate_errors() {
        let logger = AuditLogger::new(Arc::new(FailingAuditSink));

        // Must not panic or error; the fallback channel absorbs the failure.
        logger
            .record_failure(AuditLogEntry::new(
                None,
                "login",
                AuditOutcome::Denied,
                "10.0.0.1",
            ))
            .await;
    }
}
