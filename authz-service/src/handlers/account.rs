use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
    middleware::rate_limit::SourceIp,
};

use crate::{
    dtos::auth::{ChangePasswordRequest, MeResponse},
    middleware::AuthPrincipal,
    utils::ValidatedJson,
    AppState,
};

/// Return the authenticated principal with its resolved roles and
/// permission snapshot.
pub async fn me(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .directory
        .find_user_by_id(principal.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Principal not found")))?;

    Ok(Json(MeResponse {
        principal: user.sanitized(),
        tenant_id: principal.tenant_id(),
        roles: principal.roles.clone(),
        permissions: principal.permissions.iter().cloned().collect(),
    }))
}

/// Change the caller's password. All refresh sessions are terminated on
/// success.
pub async fn change_password(
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .change_password(&principal, &req.current_password, &req.new_password, source)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
