use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::services::error::{ServiceError, TokenFault};

/// The single pinned signing algorithm. Tokens whose header asserts anything
/// else are rejected before signature verification; there is no negotiation.
const PINNED_ALGORITHM: Algorithm = Algorithm::RS256;

/// JWT service for token issuance and validation.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims for access tokens (short-lived). The permission snapshot is fixed at
/// issuance and never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (principal ID)
    pub sub: Uuid,
    /// Tenant the principal belongs to; None only for universally scoped
    /// principals
    pub tenant_id: Option<Uuid>,
    /// Role names held at issuance
    pub roles: Vec<String>,
    /// Permission snapshot resolved at issuance
    pub permissions: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID (for revocation lookups)
    pub jti: String,
}

/// Claims for refresh tokens (long-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Subject (principal ID)
    pub sub: Uuid,
    /// Token ID (matches the persisted refresh session row)
    pub jti: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Token pair returned to the client.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl JwtService {
    /// Create a new JWT service by loading RSA keys from files.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;

        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;

        let service = Self::from_pem(
            &private_key_pem,
            &public_key_pem,
            config.access_token_expiry_minutes,
            config.refresh_token_expiry_days,
        )?;

        tracing::info!("JWT service initialized with RS256 keys");
        Ok(service)
    }

    /// Build a service directly from PEM strings. Key rotation swaps in a new
    /// instance; validation only ever reads the key material.
    pub fn from_pem(
        private_key_pem: &str,
        public_key_pem: &str,
        access_token_expiry_minutes: i64,
        refresh_token_expiry_days: i64,
    ) -> Result<Self, anyhow::Error> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            access_token_expiry_minutes,
            refresh_token_expiry_days,
        })
    }

    /// Issue an access token carrying the resolved permission snapshot.
    pub fn issue_access_token(
        &self,
        subject: Uuid,
        tenant_id: Option<Uuid>,
        roles: &[String],
        permissions: &BTreeSet<String>,
    ) -> Result<(String, AccessTokenClaims), ServiceError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: subject,
            tenant_id,
            roles: roles.to_vec(),
            permissions: permissions.iter().cloned().collect(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(PINNED_ALGORITHM);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok((token, claims))
    }

    /// Issue a refresh token bound to a persisted session row.
    pub fn issue_refresh_token(
        &self,
        subject: Uuid,
        token_id: Uuid,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let exp = now + Duration::days(self.refresh_token_expiry_days);

        let claims = RefreshTokenClaims {
            sub: subject,
            jti: token_id,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        let header = Header::new(PINNED_ALGORITHM);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))?;

        Ok(token)
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.check_header(token)?;

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation())
            .map_err(map_decode_error)?;

        Ok(token_data.claims)
    }

    /// Validate and decode a refresh token.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, ServiceError> {
        self.check_header(token)?;

        let token_data =
            decode::<RefreshTokenClaims>(token, &self.decoding_key, &self.validation())
                .map_err(map_decode_error)?;

        Ok(token_data.claims)
    }

    /// Reject any token whose header asserts an algorithm other than the
    /// pinned one. A header that cannot be parsed at all (including `none`)
    /// counts as malformed.
    fn check_header(&self, token: &str) -> Result<(), ServiceError> {
        let header =
            decode_header(token).map_err(|_| ServiceError::Token(TokenFault::Malformed))?;
        if header.alg != PINNED_ALGORITHM {
            return Err(ServiceError::Token(TokenFault::AlgorithmMismatch));
        }
        Ok(())
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(PINNED_ALGORITHM);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation
    }

    /// Access token expiry in seconds (for client info).
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn refresh_token_expiry_days(&self) -> i64 {
        self.refresh_token_expiry_days
    }
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> ServiceError {
    use jsonwebtoken::errors::ErrorKind;
    let fault = match err.kind() {
        ErrorKind::ExpiredSignature => TokenFault::Expired,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenFault::AlgorithmMismatch
        }
        _ => TokenFault::Malformed,
    };
    ServiceError::Token(fault)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    const PRIVATE_PEM: &str = include_str!("../../testdata/rsa_private.pem");
    const PUBLIC_PEM: &str = include_str!("../../testdata/rsa_public.pem");

    // URL-safe base64 without padding, for crafting malicious tokens.
    fn encode_segment(input: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(input)
    }

    fn service() -> JwtService {
        JwtService::from_pem(PRIVATE_PEM, PUBLIC_PEM, 15, 7).unwrap()
    }

    #[test]
    fn keys_load_from_pem_files() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");
        std::fs::File::create(&private_path)
            .unwrap()
            .write_all(PRIVATE_PEM.as_bytes())
            .unwrap();
        std::fs::File::create(&public_path)
            .unwrap()
            .write_all(PUBLIC_PEM.as_bytes())
            .unwrap();

        let config = crate::config::JwtConfig {
            private_key_path: private_path.to_string_lossy().into_owned(),
            public_key_path: public_path.to_string_lossy().into_owned(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        };

        let jwt = JwtService::new(&config).unwrap();
        let (token, _) = jwt
            .issue_access_token(Uuid::new_v4(), None, &[], &BTreeSet::new())
            .unwrap();
        jwt.validate_access_token(&token).unwrap();
    }

    fn sample_permissions() -> BTreeSet<String> {
        BTreeSet::from(["assessment.read".to_string(), "assessment.create".to_string()])
    }

    #[test]
    fn access_token_round_trip_preserves_claims() {
        let jwt = service();
        let subject = Uuid::new_v4();
        let tenant = Some(Uuid::new_v4());
        let roles = vec!["risk_analyst".to_string()];
        let permissions = sample_permissions();

        let (token, issued) = jwt
            .issue_access_token(subject, tenant, &roles, &permissions)
            .unwrap();
        let claims = jwt.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, subject);
        assert_eq!(claims.tenant_id, tenant);
        assert_eq!(claims.roles, roles);
        assert_eq!(
            claims.permissions.iter().cloned().collect::<BTreeSet<_>>(),
            permissions
        );
        assert_eq!(claims.jti, issued.jti);
        assert!(claims.exp - claims.iat <= 15 * 60);
    }

    #[test]
    fn refresh_token_round_trip() {
        let jwt = service();
        let subject = Uuid::new_v4();
        let token_id = Uuid::new_v4();

        let token = jwt.issue_refresh_token(subject, token_id).unwrap();
        let claims = jwt.validate_refresh_token(&token).unwrap();

        assert_eq!(claims.sub, subject);
        assert_eq!(claims.jti, token_id);
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let jwt = JwtService::from_pem(PRIVATE_PEM, PUBLIC_PEM, -5, 7).unwrap();
        let (token, _) = jwt
            .issue_access_token(Uuid::new_v4(), None, &[], &BTreeSet::new())
            .unwrap();

        match service().validate_access_token(&token) {
            Err(ServiceError::Token(TokenFault::Expired)) => {}
            other => panic!("expected Expired, got {:?}", other.map(|c| c.jti)),
        }
    }

    #[test]
    fn alg_none_header_is_rejected() {
        let jwt = service();
        let header = encode_segment(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = encode_segment(
            format!(
                r#"{{"sub":"{}","tenant_id":null,"roles":[],"permissions":["*"],"exp":{},"iat":{},"jti":"x"}}"#,
                Uuid::new_v4(),
                Utc::now().timestamp() + 600,
                Utc::now().timestamp(),
            )
            .as_bytes(),
        );
        let token = format!("{header}.{payload}.");

        assert!(jwt.validate_access_token(&token).is_err());
    }

    #[test]
    fn foreign_algorithm_header_is_rejected() {
        let jwt = service();
        // Signed with HS256 using the public key bytes as the HMAC secret: a
        // classic key-confusion attempt.
        let claims = AccessTokenClaims {
            sub: Uuid::new_v4(),
            tenant_id: None,
            roles: vec![],
            permissions: vec!["*".to_string()],
            exp: Utc::now().timestamp() + 600,
            iat: Utc::now().timestamp(),
            jti: "forged".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(PUBLIC_PEM.as_bytes()),
        )
        .unwrap();

        match jwt.validate_access_token(&token) {
            Err(ServiceError::Token(TokenFault::AlgorithmMismatch)) => {}
            other => panic!("expected AlgorithmMismatch, got {:?}", other.map(|c| c.jti)),
        }
    }

    #[test]
    fn garbage_token_is_malformed() {
        match service().validate_access_token("not-a-token") {
            Err(ServiceError::Token(TokenFault::Malformed)) => {}
            other => panic!("expected Malformed, got {:?}", other.map(|c| c.jti)),
        }
    }
}
