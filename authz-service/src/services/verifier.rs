//! Credential verification: password checks, account lockout, and per-source
//! throttling. The throttle is consulted before any hash comparison so a
//! flooding source never reaches the CPU-bound path.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use governor::clock::{Clock, DefaultClock};
use service_core::middleware::rate_limit::SourceRateLimiter;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::User;
use crate::services::{
    directory::Directory,
    error::{AuthFault, ServiceError},
};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Pluggable second factor consulted before any token is issued for a
/// principal whose mfa flag is set.
#[async_trait]
pub trait SecondFactor: Send + Sync {
    async fn verify(&self, user: &User, code: &str) -> Result<bool, ServiceError>;
}

/// Default second factor: compares the presented code against a stored,
/// hashed one-time code and consumes it on success.
pub struct StoredCodeFactor {
    directory: Arc<dyn Directory>,
}

impl StoredCodeFactor {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl SecondFactor for StoredCodeFactor {
    async fn verify(&self, user: &User, code: &str) -> Result<bool, ServiceError> {
        let otp = match self.directory.find_active_otp(user.user_id).await? {
            Some(otp) => otp,
            None => return Ok(false),
        };

        if !otp.matches(code) {
            return Ok(false);
        }

        self.directory.mark_otp_used(otp.otp_id).await?;
        Ok(true)
    }
}

pub struct CredentialVerifier {
    directory: Arc<dyn Directory>,
    second_factor: Arc<dyn SecondFactor>,
    throttle: SourceRateLimiter,
    lockout_threshold: i32,
    lockout_window_seconds: i64,
    /// Hash compared against for unknown emails, so the unknown-email and
    /// wrong-password paths cost the same.
    dummy_hash: PasswordHashString,
}

impl CredentialVerifier {
    pub fn new(
        directory: Arc<dyn Directory>,
        second_factor: Arc<dyn SecondFactor>,
        throttle: SourceRateLimiter,
        lockout_threshold: i32,
        lockout_window_seconds: i64,
    ) -> Result<Self, anyhow::Error> {
        let dummy_hash = hash_password(&Password::new(Uuid::new_v4().to_string()))?;

        Ok(Self {
            directory,
            second_factor,
            throttle,
            lockout_threshold,
            lockout_window_seconds,
            dummy_hash,
        })
    }

    /// Verify an email/password pair from a source address.
    ///
    /// Unknown email and wrong password both yield `InvalidCredentials`; the
    /// caller can never distinguish them.
    pub async fn verify(
        &self,
        email: &str,
        password: &str,
        source: IpAddr,
        mfa_code: Option<&str>,
    ) -> Result<User, ServiceError> {
        if let Err(negative) = self.throttle.check_key(&source) {
            let wait = negative.wait_time_from(DefaultClock::default().now());
            return Err(ServiceError::RateLimited(Some(wait.as_secs())));
        }

        let presented = Password::new(password.to_string());

        let user = match self.directory.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                // Burn the same hashing cost as the known-email path.
                let _ = verify_password(&presented, &self.dummy_hash);
                return Err(ServiceError::Authentication(AuthFault::InvalidCredentials));
            }
        };

        let now = Utc::now();
        if user.is_locked(now) {
            return Err(ServiceError::Authentication(AuthFault::AccountLocked));
        }

        // A lockout window that has elapsed resets the counter.
        let prior_failures = if user.locked_until.is_some() {
            0
        } else {
            user.failed_attempts
        };

        let stored = PasswordHashString::new(user.password_hash.clone());
        if verify_password(&presented, &stored).is_err() {
            let failures = prior_failures + 1;
            let locked_until = if failures >= self.lockout_threshold {
                Some(now + Duration::seconds(self.lockout_window_seconds))
            } else {
                None
            };
            self.directory
                .update_lockout(user.user_id, failures, locked_until)
                .await?;

            if locked_until.is_some() {
                tracing::warn!(user_id = %user.user_id, "Account locked after repeated failures");
            }
            return Err(ServiceError::Authentication(AuthFault::InvalidCredentials));
        }

        if !user.is_active() {
            return Err(ServiceError::Authentication(AuthFault::AccountDisabled));
        }

        if user.mfa_enabled {
            let code = match mfa_code {
                Some(code) => code,
                None => return Err(ServiceError::Authentication(AuthFault::MfaRequired)),
            };
            if !self.second_factor.verify(&user, code).await? {
                return Err(ServiceError::Authentication(AuthFault::InvalidCredentials));
            }
        }

        if user.failed_attempts > 0 || user.locked_until.is_some() {
            self.directory.update_lockout(user.user_id, 0, None).await?;
        }

        Ok(user)
    }
}
