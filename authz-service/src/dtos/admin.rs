use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ForceLogoutResponse {
    pub user_id: Uuid,
    pub revoked_sessions: u64,
}
