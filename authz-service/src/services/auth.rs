use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::auth::{IntrospectResponse, LoginRequest};
use crate::models::{AuditLogEntry, AuditOutcome, PrincipalSummary, RefreshToken};
use crate::services::{
    audit::AuditLogger,
    context::{enforce_tenant, PrincipalContext},
    directory::Directory,
    error::{AccessFault, AuthFault, ServiceError, TokenFault},
    jwt::{JwtService, TokenResponse},
    revocation::RevocationStore,
    verifier::CredentialVerifier,
};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

#[derive(Clone)]
pub struct AuthService {
    directory: Arc<dyn Directory>,
    jwt: JwtService,
    revocation: Arc<dyn RevocationStore>,
    audit: AuditLogger,
    verifier: Arc<CredentialVerifier>,
    universal_role: String,
}

impl AuthService {
    pub fn new(
        directory: Arc<dyn Directory>,
        jwt: JwtService,
        revocation: Arc<dyn RevocationStore>,
        audit: AuditLogger,
        verifier: Arc<CredentialVerifier>,
        universal_role: String,
    ) -> Self {
        Self {
            directory,
            jwt,
            revocation,
            audit,
            verifier,
            universal_role,
        }
    }

    /// Authenticate a principal and issue a fresh token pair.
    pub async fn login(
        &self,
        req: LoginRequest,
        source: IpAddr,
    ) -> Result<(TokenResponse, PrincipalSummary), ServiceError> {
        let user = match self
            .verifier
            .verify(&req.email, &req.password, source, req.mfa_code.as_deref())
            .await
        {
            Ok(user) => user,
            Err(err) => {
                if let ServiceError::Authentication(fault) = &err {
                    self.audit
                        .record_failure(
                            AuditLogEntry::new(None, "login", AuditOutcome::Denied, source.to_string())
                                .with_detail(fault.as_str()),
                        )
                        .await;
                }
                return Err(err);
            }
        };

        let response = self.issue_session(user.user_id, user.tenant_id).await?;

        tracing::info!(user_id = %user.user_id, "Principal logged in");
        self.audit.record(AuditLogEntry::new(
            Some(user.user_id),
            "login",
            AuditOutcome::Success,
            source.to_string(),
        ));

        Ok((response, user.sanitized()))
    }

    /// Exchange a refresh token for a fresh pair. Permissions are re-resolved
    /// from the current grants, so role changes take effect here at the
    /// latest; the presented lineage is rotated out.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        source: IpAddr,
    ) -> Result<TokenResponse, ServiceError> {
        match self.rotate_session(refresh_token).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if matches!(
                    err,
                    ServiceError::Token(_) | ServiceError::Authentication(_)
                ) {
                    self.audit
                        .record_failure(
                            AuditLogEntry::new(
                                None,
                                "refresh",
                                AuditOutcome::Denied,
                                source.to_string(),
                            )
                            .with_detail(err.to_string()),
                        )
                        .await;
                }
                Err(err)
            }
        }
    }

    async fn rotate_session(&self, refresh_token: &str) -> Result<TokenResponse, ServiceError> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;

        let stored = self
            .directory
            .find_refresh_token(claims.jti)
            .await?
            .ok_or(ServiceError::Token(TokenFault::Malformed))?;

        if stored.revoked {
            tracing::warn!(user_id = %claims.sub, "Refresh attempted on revoked session");
            return Err(ServiceError::Token(TokenFault::Revoked));
        }
        if stored.is_expired() {
            return Err(ServiceError::Token(TokenFault::Expired));
        }
        if !stored.matches(refresh_token) {
            tracing::warn!(user_id = %claims.sub, "Refresh token hash mismatch");
            return Err(ServiceError::Token(TokenFault::Malformed));
        }

        let user = self
            .directory
            .find_user_by_id(claims.sub)
            .await?
            .ok_or(ServiceError::Token(TokenFault::Malformed))?;
        if !user.is_active() {
            return Err(ServiceError::Authentication(AuthFault::AccountDisabled));
        }

        // Rotate: the old lineage ends here regardless of outcome.
        self.directory.revoke_refresh_token(stored.token_id).await?;

        let response = self.issue_session(user.user_id, user.tenant_id).await?;
        tracing::info!(user_id = %user.user_id, "Session refreshed");
        Ok(response)
    }

    /// Revoke the presented access token and its associated refresh session.
    pub async fn logout(
        &self,
        principal: &PrincipalContext,
        refresh_token: &str,
        source: IpAddr,
    ) -> Result<(), ServiceError> {
        let remaining = principal.exp - Utc::now().timestamp();
        self.revocation
            .revoke(&principal.jti, remaining, "logout")
            .await?;

        let claims = self
            .jwt
            .validate_refresh_token(refresh_token)
            .map_err(|_| ServiceError::Token(TokenFault::Malformed))?;
        if claims.sub != principal.sub {
            return Err(ServiceError::Token(TokenFault::Malformed));
        }
        if !self.directory.revoke_refresh_token(claims.jti).await? {
            return Err(ServiceError::Token(TokenFault::Malformed));
        }

        tracing::info!(user_id = %principal.sub, "Principal logged out");
        self.audit.record(AuditLogEntry::new(
            Some(principal.sub),
            "logout",
            AuditOutcome::Success,
            source.to_string(),
        ));

        Ok(())
    }

    /// Validate an access token into a request-scoped principal context.
    /// Every step fails closed, the revocation lookup included.
    pub async fn validate_token(&self, token: &str) -> Result<PrincipalContext, ServiceError> {
        let claims = self.jwt.validate_access_token(token)?;

        if self.revocation.is_revoked(&claims.jti).await? {
            return Err(ServiceError::Token(TokenFault::Revoked));
        }

        PrincipalContext::from_claims(claims)
    }

    /// Change the subject's password and terminate all of its refresh
    /// sessions.
    pub async fn change_password(
        &self,
        principal: &PrincipalContext,
        current_password: &str,
        new_password: &str,
        source: IpAddr,
    ) -> Result<(), ServiceError> {
        let user = self
            .directory
            .find_user_by_id(principal.sub)
            .await?
            .ok_or(ServiceError::Authentication(AuthFault::InvalidCredentials))?;

        let stored = PasswordHashString::new(user.password_hash.clone());
        if verify_password(&Password::new(current_password.to_string()), &stored).is_err() {
            self.audit
                .record_failure(
                    AuditLogEntry::new(
                        Some(user.user_id),
                        "password_change",
                        AuditOutcome::Denied,
                        source.to_string(),
                    )
                    .with_detail(AuthFault::InvalidCredentials.as_str()),
                )
                .await;
            return Err(ServiceError::Authentication(AuthFault::InvalidCredentials));
        }

        let new_hash = hash_password(&Password::new(new_password.to_string()))
            .map_err(ServiceError::Internal)?;
        self.directory
            .update_password(user.user_id, new_hash.as_str())
            .await?;

        let revoked = self
            .directory
            .revoke_refresh_tokens_for_user(user.user_id)
            .await?;

        tracing::info!(user_id = %user.user_id, revoked_sessions = revoked, "Password changed");
        self.audit.record(AuditLogEntry::new(
            Some(user.user_id),
            "password_change",
            AuditOutcome::Success,
            source.to_string(),
        ));

        Ok(())
    }

    /// Administrative force-logout of a target principal. The caller must be
    /// tenant-compatible with the target; the permission requirement is
    /// enforced at the route. Outstanding access tokens die at their short
    /// TTL; the refresh lineages die now.
    pub async fn force_logout(
        &self,
        admin: &PrincipalContext,
        target_user: Uuid,
        source: IpAddr,
    ) -> Result<u64, ServiceError> {
        let target = self
            .directory
            .find_user_by_id(target_user)
            .await?
            .ok_or(ServiceError::NotFound("principal"))?;

        let allowed = match target.tenant_id {
            Some(tenant) => enforce_tenant(admin, tenant),
            None if admin.is_universal() => Ok(()),
            None => Err(ServiceError::Authorization(AccessFault::TenantMismatch)),
        };
        if let Err(err) = allowed {
            self.audit
                .record_failure(
                    AuditLogEntry::new(
                        Some(admin.sub),
                        "force_logout",
                        AuditOutcome::Denied,
                        source.to_string(),
                    )
                    .with_detail(format!("target={} {}", target.user_id, err)),
                )
                .await;
            return Err(err);
        }

        let revoked = self
            .directory
            .revoke_refresh_tokens_for_user(target.user_id)
            .await?;

        tracing::warn!(
            admin_id = %admin.sub,
            target_id = %target.user_id,
            revoked_sessions = revoked,
            "Administrative force-logout"
        );
        self.audit.record(
            AuditLogEntry::new(
                Some(admin.sub),
                "force_logout",
                AuditOutcome::Success,
                source.to_string(),
            )
            .with_detail(format!("target={}", target.user_id)),
        );

        Ok(revoked)
    }

    /// Report whether an access token is currently good, with its claims.
    /// Any failure, the revocation store being unreachable included, reads as
    /// inactive.
    pub async fn introspect(&self, token: &str) -> IntrospectResponse {
        match self.validate_token(token).await {
            Ok(ctx) => IntrospectResponse {
                active: true,
                sub: Some(ctx.sub),
                tenant_id: ctx.tenant_id(),
                roles: Some(ctx.roles),
                permissions: Some(ctx.permissions.into_iter().collect()),
                jti: Some(ctx.jti),
            },
            Err(_) => IntrospectResponse {
                active: false,
                sub: None,
                tenant_id: None,
                roles: None,
                permissions: None,
                jti: None,
            },
        }
    }

    /// Resolve current permissions and mint a fresh token pair with a
    /// persisted refresh session.
    async fn issue_session(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
    ) -> Result<TokenResponse, ServiceError> {
        let roles = self.directory.roles_for_user(user_id).await?;
        let grants = self.directory.role_grants(&self.universal_role).await?;
        let permissions = grants.resolve(&roles);

        let (access_token, _claims) =
            self.jwt
                .issue_access_token(user_id, tenant_id, &roles, &permissions)?;

        let refresh_token_id = Uuid::new_v4();
        let refresh_token = self.jwt.issue_refresh_token(user_id, refresh_token_id)?;
        let row = RefreshToken::new_with_id(
            refresh_token_id,
            user_id,
            &refresh_token,
            self.jwt.refresh_token_expiry_days(),
        );
        self.directory.insert_refresh_token(&row).await?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }
}
