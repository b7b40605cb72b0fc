pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::{Request, State},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{source_rate_limit_middleware, SourceRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AuthzConfig;
use crate::services::{AuditLogger, AuthService, Directory, JwtService, RevocationStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: AuthzConfig,
    pub directory: Arc<dyn Directory>,
    pub jwt: JwtService,
    pub revocation: Arc<dyn RevocationStore>,
    pub audit: AuditLogger,
    pub auth: AuthService,
    pub ip_rate_limiter: SourceRateLimiter,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Login throttling lives inside the credential verifier (checked before
    // any hashing), so the route carries no quota of its own beyond the
    // global per-source limit.

    // Routes that require an authenticated principal.
    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::session::logout))
        .route("/auth/me", get(handlers::account::me))
        .route("/auth/password", post(handlers::account::change_password))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Administrative routes additionally require a permission grant.
    let admin_routes = Router::new()
        .route(
            "/auth/admin/principals/:user_id/force-logout",
            post(handlers::admin::force_logout),
        )
        .layer(from_fn_with_state(
            state.clone(),
            |state: State<AppState>, req: Request, next: Next| {
                middleware::require_permission("principal.revoke", state, req, next)
            },
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let ip_limiter = state.ip_rate_limiter.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(handlers::session::login))
        .route("/auth/refresh", post(handlers::session::refresh))
        .route("/auth/introspect", post(handlers::session::introspect))
        .merge(protected_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(from_fn_with_state(ip_limiter, source_rate_limit_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .filter_map(|o| {
                            o.parse::<service_core::axum::http::HeaderValue>()
                                .map_err(|e| {
                                    tracing::error!("Invalid CORS origin '{}': {}", o, e);
                                    e
                                })
                                .ok()
                        })
                        .collect::<Vec<service_core::axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    service_core::axum::http::Method::GET,
                    service_core::axum::http::Method::POST,
                    service_core::axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    service_core::axum::http::header::AUTHORIZATION,
                    service_core::axum::http::header::CONTENT_TYPE,
                ]),
        );

    Ok(app)
}

/// Service health check
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.directory.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::from(e)
    })?;

    state.revocation.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Revocation store health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up",
            "revocation_store": "up"
        }
    })))
}
