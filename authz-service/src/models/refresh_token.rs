use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh token persisted server-side for session management. Only a SHA-256
/// hash of the wire token is stored; the row is bound one-to-one to a login
/// session and its `token_id` matches the `jti` claim of the wire token.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshToken {
    /// Create a new refresh token row with a specific ID (the ID is also
    /// embedded in the JWT claims).
    pub fn new_with_id(token_id: Uuid, user_id: Uuid, token: &str, expires_in_days: i64) -> Self {
        let now = Utc::now();

        Self {
            token_id,
            user_id,
            token_hash: Self::hash_token(token),
            expires_at: now + Duration::days(expires_in_days),
            created_at: now,
            revoked: false,
        }
    }

    /// Hash a wire token using SHA-256.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check if this token is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Check if this token is valid (not expired and not revoked).
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && !self.revoked
    }

    /// Compare a presented wire token against the stored hash in constant time.
    pub fn matches(&self, token: &str) -> bool {
        use subtle::ConstantTimeEq;
        let presented = Self::hash_token(token);
        presented
            .as_bytes()
            .ct_eq(self.token_hash.as_bytes())
            .into()
    }
}
