//! OTP code model - stored second-factor codes.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// One-time code entity, stored hashed. How codes are delivered to the
/// principal is outside this core; verification consumes the row.
#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub otp_id: Uuid,
    pub user_id: Uuid,
    pub otp_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl OtpCode {
    pub fn new(user_id: Uuid, code: &str, expiry_utc: DateTime<Utc>) -> Self {
        Self {
            otp_id: Uuid::new_v4(),
            user_id,
            otp_hash: Self::hash_code(code),
            expiry_utc,
            used_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn hash_code(code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check if the code is still usable (not expired and not consumed).
    pub fn is_valid(&self) -> bool {
        self.used_utc.is_none() && Utc::now() < self.expiry_utc
    }

    /// Compare a presented code against the stored hash in constant time.
    pub fn matches(&self, code: &str) -> bool {
        use subtle::ConstantTimeEq;
        let presented = Self::hash_code(code);
        presented.as_bytes().ct_eq(self.otp_hash.as_bytes()).into()
    }
}
