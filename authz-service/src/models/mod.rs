mod audit_log;
mod otp_code;
mod refresh_token;
mod user;

pub use audit_log::{AuditLogEntry, AuditOutcome};
pub use otp_code::OtpCode;
pub use refresh_token::RefreshToken;
pub use user::{PrincipalSummary, User, UserState};
