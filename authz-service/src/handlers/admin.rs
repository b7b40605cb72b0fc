use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
    middleware::rate_limit::SourceIp,
};
use uuid::Uuid;

use crate::{dtos::admin::ForceLogoutResponse, middleware::AuthPrincipal, AppState};

/// Force-logout a principal: terminate every refresh session it holds.
/// Requires the `principal.revoke` permission (enforced at the route) and
/// tenant compatibility with the target.
pub async fn force_logout(
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
    AuthPrincipal(admin): AuthPrincipal,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.auth.force_logout(&admin, user_id, source).await?;

    Ok((
        StatusCode::OK,
        Json(ForceLogoutResponse {
            user_id,
            revoked_sessions: revoked,
        }),
    ))
}
