use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};

use service_core::middleware::rate_limit::source_addr;

use crate::dtos::ErrorResponse;
use crate::models::{AuditLogEntry, AuditOutcome};
use crate::services::PrincipalContext;
use crate::AppState;

fn bearer_token(headers: &header::HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Middleware to require a valid, unrevoked access token. The resolved
/// principal context is stored in request extensions for handlers and the
/// permission guard.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let token = match bearer_token(req.headers()) {
        Some(token) => token,
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Missing or invalid Authorization header".to_string(),
                }),
            ));
        }
    };

    let principal = match state.auth.validate_token(token).await {
        Ok(principal) => principal,
        Err(e) => {
            tracing::debug!(error = %e, "Access token rejected");
            let source = source_addr(&req)
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            state
                .audit
                .record_failure(
                    AuditLogEntry::new(None, "token_validation", AuditOutcome::Denied, source)
                        .with_detail(e.to_string()),
                )
                .await;
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or expired token".to_string(),
                }),
            ));
        }
    };

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Extractor for the principal context placed there by `auth_middleware`.
pub struct AuthPrincipal(pub PrincipalContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<PrincipalContext>().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Principal context missing from request extensions".to_string(),
            }),
        ))?;

        Ok(AuthPrincipal(principal.clone()))
    }
}

/// Raw bearer credential, for routes where the bearer is not an access token
/// (the refresh endpoint presents the refresh token this way).
pub struct BearerToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Missing or invalid Authorization header".to_string(),
            }),
        ))?;

        Ok(BearerToken(token.to_string()))
    }
}
