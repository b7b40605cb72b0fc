//! Request-scoped principal context, built by the token validator and carried
//! in request extensions for the lifetime of one request.

use std::collections::BTreeSet;
use uuid::Uuid;

use crate::services::error::{AccessFault, ServiceError, TokenFault};
use crate::services::jwt::AccessTokenClaims;
use crate::services::permissions::{self, WILDCARD};

/// Closed set of principal scopes. `System` principals are exempt from tenant
/// matching; everyone else is pinned to exactly one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalScope {
    System,
    Tenant(Uuid),
}

#[derive(Debug, Clone)]
pub struct PrincipalContext {
    pub sub: Uuid,
    pub scope: PrincipalScope,
    pub roles: Vec<String>,
    /// Permission snapshot from the token; fixed at issuance.
    pub permissions: BTreeSet<String>,
    pub jti: String,
    /// Expiry of the backing token, kept for revocation TTL bookkeeping.
    pub exp: i64,
}

impl PrincipalContext {
    /// Build a context from validated claims. A token with no tenant and no
    /// wildcard grant is ambiguous and rejected outright.
    pub fn from_claims(claims: AccessTokenClaims) -> Result<Self, ServiceError> {
        let permissions: BTreeSet<String> = claims.permissions.into_iter().collect();
        let universal = permissions.contains(WILDCARD);

        let scope = match (universal, claims.tenant_id) {
            (true, _) => PrincipalScope::System,
            (false, Some(tenant_id)) => PrincipalScope::Tenant(tenant_id),
            (false, None) => return Err(ServiceError::Token(TokenFault::Malformed)),
        };

        Ok(Self {
            sub: claims.sub,
            scope,
            roles: claims.roles,
            permissions,
            jti: claims.jti,
            exp: claims.exp,
        })
    }

    pub fn is_universal(&self) -> bool {
        self.scope == PrincipalScope::System
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        match self.scope {
            PrincipalScope::System => None,
            PrincipalScope::Tenant(id) => Some(id),
        }
    }

    pub fn has_permission(&self, required: &str) -> bool {
        permissions::is_granted(&self.permissions, required)
    }

    /// Deny-by-default permission check.
    pub fn require_permission(&self, required: &str) -> Result<(), ServiceError> {
        if self.has_permission(required) {
            Ok(())
        } else {
            Err(ServiceError::Authorization(
                AccessFault::InsufficientPermission,
            ))
        }
    }
}

/// Tenant isolation guard. Pure and stateless: universal principals pass,
/// everyone else must match the resource's tenant exactly.
pub fn enforce_tenant(
    principal: &PrincipalContext,
    resource_tenant: Uuid,
) -> Result<(), ServiceError> {
    match principal.scope {
        PrincipalScope::System => Ok(()),
        PrincipalScope::Tenant(tenant_id) if tenant_id == resource_tenant => Ok(()),
        PrincipalScope::Tenant(_) => {
            Err(ServiceError::Authorization(AccessFault::TenantMismatch))
        }
    }
}
