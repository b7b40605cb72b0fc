pub mod auth;
pub mod guard;

pub use auth::{auth_middleware, AuthPrincipal, BearerToken};
pub use guard::require_permission;
