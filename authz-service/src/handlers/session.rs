use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{IntrospectRequest, LoginRequest, LoginResponse, LogoutRequest},
    middleware::{AuthPrincipal, BearerToken},
    utils::ValidatedJson,
    AppState,
};
use service_core::middleware::rate_limit::SourceIp;

/// Login with email, password and an optional second factor.
pub async fn login(
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (tokens, principal) = state.auth.login(req, source).await?;
    Ok((StatusCode::OK, Json(LoginResponse { tokens, principal })))
}

/// Exchange a refresh token (presented as the bearer credential) for a new
/// token pair.
pub async fn refresh(
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
    BearerToken(token): BearerToken,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.refresh(&token, source).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Logout: revoke the presented access token and its refresh session.
pub async fn logout(
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
    principal: AuthPrincipal,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .logout(&principal.0, &req.refresh_token, source)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Report whether an access token is currently active.
pub async fn introspect(
    State(state): State<AppState>,
    Json(req): Json<IntrospectRequest>,
) -> impl IntoResponse {
    let res = state.auth.introspect(&req.token).await;
    Json(res)
}
