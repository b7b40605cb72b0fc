//! Shared setup for integration tests: in-memory stores behind the same
//! trait seams the binary wires to Postgres and Redis.

#![allow(dead_code)]

use authz_service::{
    config::{
        AuthzConfig, DatabaseConfig, Environment, JwtConfig, RateLimitConfig, RedisConfig,
        SecurityConfig,
    },
    services::{
        AuditLogger, AuthService, CredentialVerifier, Directory, InMemoryAuditSink,
        InMemoryDirectory, InMemoryRevocationStore, JwtService, RevocationStore, StoredCodeFactor,
    },
    utils::{hash_password, Password},
    AppState,
};
use authz_service::models::User;
use service_core::config as core_config;
use service_core::middleware::rate_limit::create_source_rate_limiter;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

pub const PRIVATE_KEY: &str = include_str!("../../testdata/rsa_private.pem");
pub const PUBLIC_KEY: &str = include_str!("../../testdata/rsa_public.pem");

pub const PASSWORD: &str = "correct horse battery staple";
pub const UNIVERSAL_ROLE: &str = "system_admin";

pub fn source() -> IpAddr {
    "192.0.2.10".parse().unwrap()
}

pub struct TestEnv {
    pub directory: Arc<InMemoryDirectory>,
    pub revocation: Arc<dyn RevocationStore>,
    pub audit_sink: Arc<InMemoryAuditSink>,
    pub jwt: JwtService,
    pub auth: AuthService,
}

/// Build an auth service over in-memory stores. The login throttle is set
/// high enough that multi-login tests do not trip it.
pub fn test_env() -> TestEnv {
    build_env(Arc::new(InMemoryRevocationStore::new()), 1000)
}

/// Same as [`test_env`] but with a caller-supplied revocation store, so tests
/// can wire in an unavailable one.
pub fn test_env_with(revocation: Arc<dyn RevocationStore>) -> TestEnv {
    build_env(revocation, 1000)
}

/// Same as [`test_env`] but with a tight per-source login quota, for tests
/// exercising the verifier throttle through the full router.
pub fn test_env_with_login_quota(attempts_per_minute: u32) -> TestEnv {
    build_env(
        Arc::new(InMemoryRevocationStore::new()),
        attempts_per_minute,
    )
}

fn build_env(revocation: Arc<dyn RevocationStore>, login_quota: u32) -> TestEnv {
    let directory = Arc::new(InMemoryDirectory::new());
    let audit_sink = Arc::new(InMemoryAuditSink::new());
    let jwt = JwtService::from_pem(PRIVATE_KEY, PUBLIC_KEY, 15, 7).expect("jwt service");

    let auth = build_auth(
        directory.clone(),
        revocation.clone(),
        audit_sink.clone(),
        jwt.clone(),
        login_quota,
    );

    TestEnv {
        directory,
        revocation,
        audit_sink,
        jwt,
        auth,
    }
}

pub fn build_auth(
    directory: Arc<InMemoryDirectory>,
    revocation: Arc<dyn RevocationStore>,
    audit_sink: Arc<InMemoryAuditSink>,
    jwt: JwtService,
    login_quota: u32,
) -> AuthService {
    let dir: Arc<dyn Directory> = directory.clone();
    let throttle = create_source_rate_limiter(login_quota, 60);
    let second_factor = Arc::new(StoredCodeFactor::new(dir.clone()));
    let verifier = Arc::new(
        CredentialVerifier::new(dir.clone(), second_factor, throttle, 5, 900)
            .expect("credential verifier"),
    );

    AuthService::new(
        dir,
        jwt,
        revocation,
        AuditLogger::new(audit_sink),
        verifier,
        UNIVERSAL_ROLE.to_string(),
    )
}

/// Insert a user with the shared test password and the given roles.
pub fn seed_user(env: &TestEnv, tenant_id: Option<Uuid>, email: &str, roles: &[&str]) -> User {
    let hash = hash_password(&Password::new(PASSWORD.to_string())).expect("hash");
    let user = User::new(tenant_id, email.to_string(), hash.into_string());
    env.directory.insert_user(
        user.clone(),
        roles.iter().map(|r| r.to_string()).collect(),
    );
    user
}

/// Minimal config for router-level tests. Key paths are unused because the
/// JWT service is built from embedded PEMs.
pub fn test_config() -> AuthzConfig {
    AuthzConfig {
        common: core_config::Config { port: 0 },
        environment: Environment::Dev,
        service_name: "authz-service".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
            op_timeout_ms: 100,
        },
        jwt: JwtConfig {
            private_key_path: "unused".to_string(),
            public_key_path: "unused".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            universal_role: UNIVERSAL_ROLE.to_string(),
            lockout_threshold: 5,
            lockout_window_seconds: 900,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
    }
}

/// Full application state over in-memory stores, for driving the router.
pub fn test_state(env: &TestEnv) -> AppState {
    AppState {
        config: test_config(),
        directory: env.directory.clone(),
        jwt: env.jwt.clone(),
        revocation: env.revocation.clone(),
        audit: AuditLogger::new(env.audit_sink.clone()),
        auth: env.auth.clone(),
        ip_rate_limiter: create_source_rate_limiter(10_000, 60),
    }
}
