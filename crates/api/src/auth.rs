// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Bearer token verification
//!
//! Tokens are HS256 JWTs carrying the caller's tenant and role. Verification
//! sits behind [`TokenVerifier`] so the middleware can be exercised without
//! signing real tokens.

use std::fmt;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use shared_types::{Role, TenantId};

use crate::error::AuthError;

/// Claims carried by a gateway bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (caller identity)
    pub sub: String,
    /// Tenant the caller belongs to
    pub tenant_id: TenantId,
    /// Caller role; unrecognised values become [`Role::Unknown`]
    #[serde(default = "unknown_role")]
    pub role: Role,
    /// Expiration as seconds since the Unix epoch
    pub exp: i64,
}

fn unknown_role() -> Role {
    Role::Unknown
}

impl Claims {
    /// Expiry as a timestamp, `None` if out of range
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// An authenticated request: the verified claims and the raw token
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// Verified claims
    pub claims: Claims,
    /// Raw bearer token as presented
    pub token: String,
}

/// Verifies a raw bearer token and returns its claims
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier: Send + Sync {
    /// Verify signature and expiry
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Expired` for expired tokens and
    /// `AuthError::InvalidToken` for anything else that fails verification.
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 verifier backed by a shared secret
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &Algorithm::HS256)
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`
    pub fn hs256(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.leeway = 0;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken {
                    message: e.to_string(),
                },
            })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MissingCredentials)?;
    let token = token.trim();

    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    const SECRET: &[u8] = b"unit-test-secret";

    fn sign(claims: &serde_json::Value, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn in_one_hour() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn verifies_valid_token() {
        let token = sign(
            &serde_json::json!({
                "sub": "svc-orders",
                "tenant_id": "acme",
                "role": "operator",
                "exp": in_one_hour()
            }),
            SECRET,
        );

        let claims = JwtVerifier::hs256(SECRET).verify(&token).unwrap();
        assert_eq!(claims.sub, "svc-orders");
        assert_eq!(claims.tenant_id.as_str(), "acme");
        assert_eq!(claims.role, Role::Operator);
        assert!(claims.expires_at().is_some());
    }

    #[test]
    fn unknown_or_missing_role_is_least_privileged() {
        for role in [serde_json::json!("superuser"), serde_json::Value::Null] {
            let mut claims = serde_json::json!({
                "sub": "u",
                "tenant_id": "acme",
                "exp": in_one_hour()
            });
            if !role.is_null() {
                claims["role"] = role;
            }
            let verified = JwtVerifier::hs256(SECRET)
                .verify(&sign(&claims, SECRET))
                .unwrap();
            assert_eq!(verified.role, Role::Unknown);
            assert_eq!(verified.role.access_level(), 0);
        }
    }

    #[test]
    fn rejects_expired_token() {
        let token = sign(
            &serde_json::json!({
                "sub": "u",
                "tenant_id": "acme",
                "role": "admin",
                "exp": Utc::now().timestamp() - 10
            }),
            SECRET,
        );
        assert_eq!(
            JwtVerifier::hs256(SECRET).verify(&token),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn rejects_wrong_signature() {
        let token = sign(
            &serde_json::json!({
                "sub": "u",
                "tenant_id": "acme",
                "role": "admin",
                "exp": in_one_hour()
            }),
            b"another-secret",
        );
        assert!(matches!(
            JwtVerifier::hs256(SECRET).verify(&token),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingCredentials));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Ok("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers), Ok("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingCredentials));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingCredentials));
    }
}
