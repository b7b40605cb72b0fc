use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of an audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Failure => "failure",
        }
    }
}

/// Append-only audit record. Detailed failure reasons live here even when the
/// caller-visible error is a deliberately generic 401/403.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub entry_id: Uuid,
    pub principal_id: Option<Uuid>,
    pub action: String,
    pub outcome: String,
    pub ip_address: String,
    pub detail: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        principal_id: Option<Uuid>,
        action: impl Into<String>,
        outcome: AuditOutcome,
        ip_address: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            principal_id,
            action: action.into(),
            outcome: outcome.as_str().to_string(),
            ip_address: ip_address.into(),
            detail: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
