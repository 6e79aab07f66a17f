//! Bearer token extraction and HS256 verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::auth::claims::IdentityClaims;
use crate::config::AuthConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Malformed token, bad signature, wrong issuer or missing claims.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    ExpiredToken,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Verifies signed identity tokens.
pub struct IdentityVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl IdentityVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked in `verify` against the request's clock reading.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        if let Some(iss) = &config.issuer {
            validation.set_issuer(&[iss.as_str()]);
        }

        Self {
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
        }
    }

    pub fn from_secret(secret: &str) -> Self {
        Self::new(&AuthConfig {
            jwt_secret: secret.to_string(),
            ..AuthConfig::default()
        })
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Validate `token` and return its claims.
    ///
    /// `exp <= now` is rejected as [`AuthError::ExpiredToken`] regardless of
    /// what the signature check concluded.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<IdentityClaims, AuthError> {
        let data = decode::<IdentityClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        if claims.exp <= now.timestamp() {
            return Err(AuthError::ExpiredToken);
        }

        Ok(claims)
    }

    /// Sign `claims` with the shared secret.
    pub fn issue(&self, claims: &IdentityClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

/// Pull the token out of an `Authorization` header value.
///
/// Returns `None` when the header is missing or is not `<scheme> <token>`
/// with a non-empty token.
pub fn extract_bearer_token<'a>(header: Option<&'a str>, scheme: &str) -> Option<&'a str> {
    let value = header?;
    let rest = value.strip_prefix(scheme)?.strip_prefix(' ')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
