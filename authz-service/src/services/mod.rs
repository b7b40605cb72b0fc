pub mod audit;
pub mod auth;
pub mod context;
pub mod directory;
pub mod error;
pub mod jwt;
pub mod permissions;
pub mod revocation;
pub mod verifier;

pub use audit::{AuditLogger, AuditSink, FailingAuditSink, InMemoryAuditSink, PgAuditSink};
pub use auth::AuthService;
pub use context::{enforce_tenant, PrincipalContext, PrincipalScope};
pub use directory::{create_pool, run_migrations, Directory, InMemoryDirectory, PgDirectory};
pub use error::{AccessFault, AuthFault, ServiceError, TokenFault};
pub use jwt::{AccessTokenClaims, JwtService, RefreshTokenClaims, TokenResponse};
pub use permissions::{RoleGrants, WILDCARD};
pub use revocation::{
    InMemoryRevocationStore, RedisRevocationStore, RevocationStore, UnavailableRevocationStore,
};
pub use verifier::{CredentialVerifier, SecondFactor, StoredCodeFactor};
