//! Access-token validation for socket handshakes.
//!
//! [`AccessTokenValidator`] is the seam to the HTTP auth service; the
//! gateway ships [`JwtValidator`], which verifies the same HMAC-SHA256
//! tokens the auth service issues.

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use quill_core::{Error, Identity, Result, Role};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Issuer claim on every Quill token.
pub const ISSUER: &str = "quill";

// ── Claims ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims carried by access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuillClaims {
    /// Subject -- the user id.
    pub sub: String,
    /// Display name at issue time.
    pub name: String,
    pub role: Role,
    /// Refresh tokens are never accepted on a socket.
    pub typ: TokenType,
    /// Issuer -- always "quill".
    pub iss: String,
    /// Expiration (UTC epoch seconds).
    pub exp: usize,
    /// Issued-at (UTC epoch seconds).
    pub iat: usize,
}

// ── Validator trait ─────────────────────────────────────────────────

/// Resolves a bearer credential to a verified identity.
#[async_trait]
pub trait AccessTokenValidator: Send + Sync + 'static {
    /// Fails with [`Error::InvalidAuth`] if the token is malformed,
    /// expired, or signature-invalid.
    async fn validate_access_token(&self, token: &str) -> Result<Identity>;
}

// ── JwtValidator ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
}

impl JwtValidator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue an access token for `identity`, valid for `ttl_secs`.
    pub fn issue_token(&self, identity: &Identity, ttl_secs: usize) -> Result<String> {
        self.issue(identity, TokenType::Access, ttl_secs)
    }

    /// Issue a refresh token. The socket handshake rejects these.
    pub fn issue_refresh_token(&self, identity: &Identity, ttl_secs: usize) -> Result<String> {
        self.issue(identity, TokenType::Refresh, ttl_secs)
    }

    fn issue(&self, identity: &Identity, typ: TokenType, ttl_secs: usize) -> Result<String> {
        let now = jsonwebtoken::get_current_timestamp() as usize;
        let claims = QuillClaims {
            sub: identity.id.clone(),
            name: identity.name.clone(),
            role: identity.role,
            typ,
            iss: ISSUER.to_string(),
            exp: now + ttl_secs,
            iat: now,
        };

        encode(
            &Header::default(), // HS256
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("Failed to encode JWT: {e}")))
    }

    /// Decode and verify a token.
    ///
    /// Validates:
    /// - Algorithm: HS256
    /// - Issuer: "quill"
    /// - Required claims: sub, exp, iss
    /// - Token type: access
    pub fn decode_access(&self, token: &str) -> Result<QuillClaims> {
        if token.is_empty() {
            return Err(Error::InvalidAuth);
        }

        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["sub", "exp", "iss"]);

        let token_data = decode::<QuillClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            debug!(error = %e, "JWT validation failed");
            Error::InvalidAuth
        })?;

        if token_data.claims.typ != TokenType::Access {
            debug!(sub = %token_data.claims.sub, "non-access token presented");
            return Err(Error::InvalidAuth);
        }
        Ok(token_data.claims)
    }
}

#[async_trait]
impl AccessTokenValidator for JwtValidator {
    async fn validate_access_token(&self, token: &str) -> Result<Identity> {
        let claims = self.decode_access(token)?;
        Ok(Identity {
            id: claims.sub,
            name: claims.name,
            role: claims.role,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
