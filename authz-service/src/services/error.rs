use service_core::error::AppError;
use thiserror::Error;

/// Authentication failures. All of these surface as the same generic 401 so a
/// caller cannot probe which sub-case occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFault {
    InvalidCredentials,
    AccountLocked,
    AccountDisabled,
    MfaRequired,
}

impl AuthFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFault::InvalidCredentials => "invalid_credentials",
            AuthFault::AccountLocked => "account_locked",
            AuthFault::AccountDisabled => "account_disabled",
            AuthFault::MfaRequired => "mfa_required",
        }
    }
}

/// Authorization failures, surfaced as 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    InsufficientPermission,
    TenantMismatch,
}

impl AccessFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessFault::InsufficientPermission => "insufficient_permission",
            AccessFault::TenantMismatch => "tenant_mismatch",
        }
    }
}

/// Token failures. Normalized to a single generic 401 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFault {
    Malformed,
    Expired,
    Revoked,
    AlgorithmMismatch,
}

impl TokenFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenFault::Malformed => "malformed",
            TokenFault::Expired => "expired",
            TokenFault::Revoked => "revoked",
            TokenFault::AlgorithmMismatch => "algorithm_mismatch",
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Authentication failed: {}", .0.as_str())]
    Authentication(AuthFault),

    #[error("Authorization failed: {}", .0.as_str())]
    Authorization(AccessFault),

    #[error("Token rejected: {}", .0.as_str())]
    Token(TokenFault),

    /// Revocation status could not be confirmed within the timeout. Fail
    /// closed: treated as a rejected token on the wire.
    #[error("Revocation store unavailable")]
    RevocationUnavailable,

    #[error("Rate limited")]
    RateLimited(Option<u64>),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            // One opaque message for every authentication sub-cause; the real
            // reason is recorded in the audit log.
            ServiceError::Authentication(_) => {
                AppError::AuthError(anyhow::anyhow!("Authentication failed"))
            }
            ServiceError::Authorization(fault) => AppError::Forbidden(match fault {
                AccessFault::InsufficientPermission => anyhow::anyhow!("Insufficient permission"),
                AccessFault::TenantMismatch => anyhow::anyhow!("Access denied for this tenant"),
            }),
            // One opaque message for every token sub-cause, revocation-store
            // unavailability included.
            ServiceError::Token(_) | ServiceError::RevocationUnavailable => {
                AppError::AuthError(anyhow::anyhow!("Invalid token"))
            }
            ServiceError::RateLimited(retry) => AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                retry,
            ),
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::response::IntoResponse;

    fn status_of(err: ServiceError) -> u16 {
        AppError::from(err).into_response().status().as_u16()
    }

    #[test]
    fn authentication_faults_collapse_to_401() {
        for fault in [
            AuthFault::InvalidCredentials,
            AuthFault::AccountLocked,
            AuthFault::AccountDisabled,
            AuthFault::MfaRequired,
        ] {
            assert_eq!(status_of(ServiceError::Authentication(fault)), 401);
        }
    }

    #[test]
    fn token_faults_collapse_to_401() {
        for fault in [
            TokenFault::Malformed,
            TokenFault::Expired,
            TokenFault::Revoked,
            TokenFault::AlgorithmMismatch,
        ] {
            assert_eq!(status_of(ServiceError::Token(fault)), 401);
        }
        assert_eq!(status_of(ServiceError::RevocationUnavailable), 401);
    }

    #[test]
    fn authorization_faults_surface_as_403() {
        assert_eq!(
            status_of(ServiceError::Authorization(
                AccessFault::InsufficientPermission
            )),
            403
        );
        assert_eq!(
            status_of(ServiceError::Authorization(AccessFault::TenantMismatch)),
            403
        );
    }
}
