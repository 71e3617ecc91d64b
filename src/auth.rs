//! Session verification for the WebSocket handshake.
//!
//! Tokens are minted elsewhere; the core only decodes them through the
//! [`SessionVerifier`] seam and never inspects their internal structure
//! beyond what the injected implementation exposes.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;

/// Identity and expiry decoded from a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: i64,
    /// Unix timestamp (seconds) after which the session is invalid.
    pub expires_at: i64,
}

/// Reasons a handshake token is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("missing token")]
    Missing,
    #[error("invalid token")]
    Invalid,
}

/// Translates an opaque bearer token into a verified session.
///
/// Verification is total and deterministic; implementations must not block.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<SessionClaims, AuthFailure>;
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    exp: i64,
}

/// Production verifier: HS256 JWTs keyed by `SESSION_SECRET`, with the
/// decimal user id in the `sub` claim.
pub struct JwtSessionVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl SessionVerifier for JwtSessionVerifier {
    fn verify(&self, token: &str) -> Result<SessionClaims, AuthFailure> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthFailure::Invalid)?;
        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| AuthFailure::Invalid)?;
        Ok(SessionClaims {
            user_id,
            expires_at: data.claims.exp,
        })
    }
}

/// Strip the `Bearer ` prefix from an `Authorization` header value.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}
