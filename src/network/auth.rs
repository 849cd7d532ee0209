//! JWT Authentication
//!
//! Validates bearer tokens from an external identity provider. The gateway
//! never issues tokens. A participant's identity is a hash of the token's
//! `sub` claim, so the same account maps to the same participant on every
//! connection.

use std::collections::HashSet;

use chrono::Utc;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::participant_id_from_subject;
use crate::core::ids::ParticipantId;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss` claim, if any.
    pub issuer: Option<String>,
    /// Required `aud` claim, if any.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Local testing only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_ISSUER`, `AUTH_AUDIENCE`, `AUTH_PUBLIC_KEY_PEM`,
    /// `AUTH_SECRET` and `AUTH_SKIP_EXPIRY`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE"),
            public_key_pem: var("AUTH_PUBLIC_KEY_PEM"),
            secret: var("AUTH_SECRET"),
            skip_expiry: matches!(var("AUTH_SKIP_EXPIRY").as_deref(), Some("true") | Some("1")),
        }
    }

    /// Whether a verification key is present.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn algorithm(&self) -> Algorithm {
        if self.public_key_pem.is_some() {
            Algorithm::RS256
        } else {
            Algorithm::HS256
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match (&self.public_key_pem, &self.secret) {
            (Some(pem), _) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e))),
            (None, Some(secret)) => Ok(DecodingKey::from_secret(secret.as_bytes())),
            (None, None) => Err(AuthError::NotConfigured),
        }
    }
}

/// Claims read from a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account identifier at the provider.
    pub sub: String,
    /// Expiry (Unix seconds). Zero means none.
    #[serde(default)]
    pub exp: i64,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: i64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience. Providers send either a string or a list.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Participant this token authenticates.
    pub fn participant_id(&self) -> ParticipantId {
        participant_id_from_subject(&self.sub)
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Malformed token.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature check failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token past its expiry.
    #[error("token expired")]
    Expired,
    /// Wrong `iss`.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Wrong `aud`.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim absent or empty.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Any other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a bearer token and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let mut validation = Validation::new(config.algorithm());
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = !config.skip_expiry;

    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match &config.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let key = config.decoding_key()?;
    let claims = decode::<TokenClaims>(token, &key, &validation)
        .map_err(map_jwt_error)?
        .claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // jsonwebtoken applies leeway; enforce the hard cutoff here
    if !config.skip_expiry && claims.exp > 0 && Utc::now().timestamp() > claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
