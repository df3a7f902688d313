//! Authentication extractor.
//!
//! Bearer tokens are HS256 JWTs issued by the identity provider. This service
//! only verifies them; it never issues credentials.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use enroll_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated user extracted from a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// Display name, if the token carries one.
    pub username: Option<String>,
    /// Email address, if the token carries one.
    pub email: Option<String>,
}

/// JWT claims issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Expiration time (seconds since the epoch).
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: Option<i64>,
    /// Display name.
    #[serde(default)]
    pub username: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let claims = validate_jwt(token, &state.config.jwt_secret)?;

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(Self {
            user_id,
            username: claims.username,
            email: claims.email,
        })
    }
}

/// Verify signature and expiry of an HS256 token.
fn validate_jwt(token: &str, secret: &str) -> Result<JwtClaims, ApiError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            ApiError::Unauthorized
        })
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    fn token(claims: &JwtClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp: i64) -> JwtClaims {
        JwtClaims {
            sub: UserId::generate().to_string(),
            exp,
            iat: None,
            username: Some("kim".into()),
            email: None,
        }
    }

    #[test]
    fn accepts_valid_token() {
        let claims = claims(chrono::Utc::now().timestamp() + 600);
        let decoded = validate_jwt(&token(&claims, "secret"), "secret").unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.username.as_deref(), Some("kim"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let claims = claims(chrono::Utc::now().timestamp() + 600);
        let result = validate_jwt(&token(&claims, "secret"), "other");
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn rejects_expired_token() {
        let claims = claims(chrono::Utc::now().timestamp() - 3600);
        let result = validate_jwt(&token(&claims, "secret"), "secret");
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
