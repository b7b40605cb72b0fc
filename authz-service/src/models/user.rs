//! User model - the authenticated principal record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User state codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Active,
    Disabled,
}

impl UserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserState::Active => "active",
            UserState::Disabled => "disabled",
        }
    }
}

/// Principal entity. `tenant_id` is immutable for tenant-scoped principals;
/// a NULL tenant is only meaningful together with the universal role.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub user_state_code: String,
    pub mfa_enabled: bool,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new tenant-scoped user.
    pub fn new(tenant_id: Option<Uuid>, email: String, password_hash: String) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            password_hash,
            display_name: None,
            user_state_code: UserState::Active.as_str().to_string(),
            mfa_enabled: false,
            failed_attempts: 0,
            locked_until: None,
            created_utc: Utc::now(),
        }
    }

    /// Check if the account is active (not administratively disabled).
    pub fn is_active(&self) -> bool {
        self.user_state_code == UserState::Active.as_str()
    }

    /// Check if the account is inside a lockout window.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| now < until).unwrap_or(false)
    }

    /// Convert to a sanitized summary (no credential material).
    pub fn sanitized(&self) -> PrincipalSummary {
        PrincipalSummary {
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Principal summary returned alongside freshly issued tokens.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalSummary {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_user_is_active_and_unlocked() {
        let user = User::new(Some(Uuid::new_v4()), "a@b.test".into(), "hash".into());
        assert!(user.is_active());
        assert!(!user.is_locked(Utc::now()));
    }

    #[test]
    fn lockout_window_expires() {
        let mut user = User::new(None, "a@b.test".into(), "hash".into());
        let now = Utc::now();

        user.locked_until = Some(now + Duration::minutes(5));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + Duration::minutes(6)));
    }
}
