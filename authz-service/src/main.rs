use authz_service::{
    build_router,
    config::AuthzConfig,
    services::{
        AuditLogger, AuthService, CredentialVerifier, JwtService, PgAuditSink, PgDirectory,
        RedisRevocationStore, StoredCodeFactor,
    },
    AppState,
};
use service_core::middleware::rate_limit::create_source_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthzConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authorization service"
    );

    // Initialize database connections
    tracing::info!("Initializing database connections");
    let pool = authz_service::services::create_pool(&config.database)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::Error::new(e)))?;
    authz_service::services::run_migrations(&pool)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::Error::new(e)))?;
    tracing::info!("Database initialized successfully");

    let directory = Arc::new(PgDirectory::new(pool.clone()));

    // Initialize revocation store
    let revocation = RedisRevocationStore::new(
        &config.redis.url,
        Duration::from_millis(config.redis.op_timeout_ms),
    )
    .await?;
    let revocation = Arc::new(revocation);
    tracing::info!("Revocation store initialized");

    // Initialize JWT service
    let jwt = JwtService::new(&config.jwt)?;
    tracing::info!("JWT service initialized");

    // The login throttle belongs to the credential verifier alone; a second
    // route-level quota would make every attempt count twice.
    let login_throttle = create_source_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let ip_rate_limiter = create_source_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Login throttle and Global IP");

    // Initialize services
    let audit = AuditLogger::new(Arc::new(PgAuditSink::new(pool.clone())));
    let second_factor = Arc::new(StoredCodeFactor::new(directory.clone()));
    let verifier = Arc::new(CredentialVerifier::new(
        directory.clone(),
        second_factor,
        login_throttle,
        config.security.lockout_threshold,
        config.security.lockout_window_seconds,
    )?);
    let auth = AuthService::new(
        directory.clone(),
        jwt.clone(),
        revocation.clone(),
        audit.clone(),
        verifier,
        config.security.universal_role.clone(),
    );

    // Create application state
    let state = AppState {
        config: config.clone(),
        directory,
        jwt,
        revocation,
        audit,
        auth,
        ip_rate_limiter,
    };

    // Build application router
    let app = build_router(state).await?;

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Give in-flight requests time to complete
    tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
}
