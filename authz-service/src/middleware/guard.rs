use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::models::{AuditLogEntry, AuditOutcome};
use crate::services::{AccessFault, PrincipalContext, ServiceError};
use crate::AppState;
use service_core::error::AppError;
use service_core::middleware::rate_limit::source_addr;

/// Require a specific permission on the authenticated principal. Runs after
/// `auth_middleware`; denials are audited.
pub async fn require_permission(
    permission: &'static str,
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req
        .extensions()
        .get::<PrincipalContext>()
        .cloned()
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("principal context missing")))?;

    if !principal.has_permission(permission) {
        let source = source_addr(&req)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::warn!(
            user_id = %principal.sub,
            permission = permission,
            "Permission denied"
        );
        state
            .audit
            .record_failure(
                AuditLogEntry::new(
                    Some(principal.sub),
                    "permission_check",
                    AuditOutcome::Denied,
                    source,
                )
                .with_detail(permission),
            )
            .await;
        return Err(ServiceError::Authorization(AccessFault::InsufficientPermission).into());
    }

    Ok(next.run(req).await)
}
