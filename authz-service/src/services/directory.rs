//! Directory: persistence seam for principals, roles, grants, refresh
//! sessions, and second-factor codes.
//!
//! `PgDirectory` is the production implementation; `InMemoryDirectory` backs
//! tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{OtpCode, RefreshToken, User};
use crate::services::{permissions::RoleGrants, ServiceError};

#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;

    /// Persist the failed-attempt counter and optional lockout deadline.
    async fn update_lockout(
        &self,
        user_id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), ServiceError>;

    async fn update_password(&self, user_id: Uuid, password_hash: &str)
        -> Result<(), ServiceError>;

    /// Role names assigned to a user.
    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<String>, ServiceError>;

    /// Load the current versioned role-to-permission grants snapshot.
    async fn role_grants(&self, universal_role: &str) -> Result<RoleGrants, ServiceError>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError>;
    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshToken>, ServiceError>;

    /// Mark a refresh token revoked. Returns whether a row matched.
    /// Idempotent: revoking an already-revoked row reports a match.
    async fn revoke_refresh_token(&self, token_id: Uuid) -> Result<bool, ServiceError>;

    /// Revoke every refresh session for a user (password change, force-logout).
    async fn revoke_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError>;

    /// Most recent unconsumed second-factor code for a user, if any.
    async fn find_active_otp(&self, user_id: Uuid) -> Result<Option<OtpCode>, ServiceError>;
    async fn mark_otp_used(&self, otp_id: Uuid) -> Result<(), ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

// ==================== PostgreSQL ====================

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// PostgreSQL-backed directory.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_lockout(
        &self,
        user_id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), ServiceError> {
        sqlx::query("UPDATE users SET failed_attempts = $2, locked_until = $3 WHERE user_id = $1")
            .bind(user_id)
            .bind(failed_attempts)
            .bind(locked_until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), ServiceError> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.role_name
            FROM user_roles ur
            JOIN roles r ON r.role_id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY r.role_name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn role_grants(&self, universal_role: &str) -> Result<RoleGrants, ServiceError> {
        let (revision,): (i64,) = sqlx::query_as("SELECT revision FROM grant_revision")
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT r.role_name, p.permission_token
            FROM role_permissions rp
            JOIN roles r ON r.role_id = rp.role_id
            JOIN permissions p ON p.permission_id = rp.permission_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grants: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (role, perm) in rows {
            grants.entry(role).or_default().insert(perm);
        }

        Ok(RoleGrants::new(revision, universal_role, grants))
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_id, user_id, token_hash, expires_at, created_at, revoked)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .bind(token.revoked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        let token =
            sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE token_id = $1")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(token)
    }

    async fn revoke_refresh_token(&self, token_id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE token_id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND NOT revoked",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_active_otp(&self, user_id: Uuid) -> Result<Option<OtpCode>, ServiceError> {
        let otp = sqlx::query_as::<_, OtpCode>(
            r#"
            SELECT * FROM otp_codes
            WHERE user_id = $1 AND used_utc IS NULL AND expiry_utc > NOW()
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(otp)
    }

    async fn mark_otp_used(&self, otp_id: Uuid) -> Result<(), ServiceError> {
        sqlx::query("UPDATE otp_codes SET used_utc = NOW() WHERE otp_id = $1")
            .bind(otp_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ==================== In-memory ====================

#[derive(Default)]
struct InMemoryState {
    users: HashMap<Uuid, User>,
    user_roles: HashMap<Uuid, Vec<String>>,
    grants: BTreeMap<String, BTreeSet<String>>,
    grant_revision: i64,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    otp_codes: HashMap<Uuid, OtpCode>,
}

/// In-memory directory used by tests and local development.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<InMemoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                grant_revision: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, ServiceError> {
        self.state
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Directory mutex poisoned: {e}")))
    }

    pub fn insert_user(&self, user: User, roles: Vec<String>) {
        let mut state = self.lock().expect("directory mutex poisoned");
        state.user_roles.insert(user.user_id, roles);
        state.users.insert(user.user_id, user);
    }

    pub fn grant(&self, role: &str, permission: &str) {
        let mut state = self.lock().expect("directory mutex poisoned");
        state
            .grants
            .entry(role.to_string())
            .or_default()
            .insert(permission.to_string());
        state.grant_revision += 1;
    }

    pub fn revoke_grant(&self, role: &str, permission: &str) {
        let mut state = self.lock().expect("directory mutex poisoned");
        if let Some(perms) = state.grants.get_mut(role) {
            perms.remove(permission);
        }
        state.grant_revision += 1;
    }

    pub fn insert_otp(&self, otp: OtpCode) {
        let mut state = self.lock().expect("directory mutex poisoned");
        state.otp_codes.insert(otp.otp_id, otp);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let state = self.lock()?;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let state = self.lock()?;
        Ok(state.users.get(&user_id).cloned())
    }

    async fn update_lockout(
        &self,
        user_id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.failed_attempts = failed_attempts;
            user.locked_until = locked_until;
        }
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let state = self.lock()?;
        Ok(state.user_roles.get(&user_id).cloned().unwrap_or_default())
    }

    async fn role_grants(&self, universal_role: &str) -> Result<RoleGrants, ServiceError> {
        let state = self.lock()?;
        Ok(RoleGrants::new(
            state.grant_revision,
            universal_role,
            state.grants.clone(),
        ))
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state.refresh_tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        let state = self.lock()?;
        Ok(state.refresh_tokens.get(&token_id).cloned())
    }

    async fn revoke_refresh_token(&self, token_id: Uuid) -> Result<bool, ServiceError> {
        let mut state = self.lock()?;
        match state.refresh_tokens.get_mut(&token_id) {
            Some(token) => {
                token.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let mut state = self.lock()?;
        let mut revoked = 0;
        for token in state.refresh_tokens.values_mut() {
            if token.user_id == user_id && !token.revoked {
                token.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn find_active_otp(&self, user_id: Uuid) -> Result<Option<OtpCode>, ServiceError> {
        let state = self.lock()?;
        Ok(state
            .otp_codes
            .values()
            .filter(|otp| otp.user_id == user_id && otp.is_valid())
            .max_by_key(|otp| otp.created_utc)
            .cloned())
    }

    async fn mark_otp_used(&self, otp_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if let Some(otp) = state.otp_codes.get_mut(&otp_id) {
            otp.used_utc = Some(Utc::now());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_revoke_is_idempotent() {
        let dir = InMemoryDirectory::new();
        let token = RefreshToken::new_with_id(Uuid::new_v4(), Uuid::new_v4(), "tok", 7);
        dir.insert_refresh_token(&token).await.unwrap();

        assert!(dir.revoke_refresh_token(token.token_id).await.unwrap());
        assert!(dir.revoke_refresh_token(token.token_id).await.unwrap());

        let stored = dir.find_refresh_token(token.token_id).await.unwrap().unwrap();
        assert!(stored.revoked);
    }

    #[tokio::test]
    async fn grant_changes_bump_revision() {
        let dir = InMemoryDirectory::new();
        let before = dir.role_grants("system_admin").await.unwrap().revision;
        dir.grant("risk_analyst", "assessment.read");
        let after = dir.role_grants("system_admin").await.unwrap().revision;
        assert!(after > before);
    }
}
