//! Tenant and user identity extraction.
//!
//! Identity is issued upstream; this layer only validates the bearer token
//! and exposes the claims. Reviewer endpoints additionally require one of
//! the reviewer roles.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Roles allowed to review student verifications.
pub const REVIEWER_ROLES: [&str; 2] = ["admin", "manager"];

#[derive(Debug, Deserialize)]
pub struct Claims {
    /// User identifier
    pub sub: String,
    /// Tenant slug the user belongs to
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: usize,
}

/// Authenticated caller, extracted from the Authorization header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            tenant_id: claims.tenant,
            email: claims.email,
            roles: claims.roles,
        }
    }

    /// Tenant-scoped endpoints require a resolved tenant.
    pub fn require_tenant(&self) -> Result<&str, ApiError> {
        self.tenant_id
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Tenant ID not found".to_string()))
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.roles.iter().any(|r| roles.contains(&r.as_str()))
    }

    pub fn require_reviewer(&self) -> Result<(), ApiError> {
        if self.has_any_role(&REVIEWER_ROLES) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "Reviewer role required".to_string(),
            ))
        }
    }
}

pub fn decode_bearer_token(token: &str, secret: &str) -> Result<AuthUser, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Bearer token validation failed");
        ApiError::Unauthorized("Invalid token".to_string())
    })?;

    Ok(AuthUser::from_claims(data.claims))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        decode_bearer_token(token, &state.config.jwt_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp() + 3600
    }

    #[test]
    fn valid_token_yields_claims() {
        let t = token(json!({
            "sub": "user-1",
            "tenant": "acme",
            "email": "u@acme.test",
            "roles": ["admin"],
            "exp": future_exp(),
        }));

        let user = decode_bearer_token(&t, SECRET).unwrap();
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.tenant_id.as_deref(), Some("acme"));
        assert!(user.has_any_role(&REVIEWER_ROLES));
        assert!(user.require_reviewer().is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let t = token(json!({ "sub": "user-1", "exp": future_exp() }));
        assert!(decode_bearer_token(&t, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let t = token(json!({
            "sub": "user-1",
            "exp": time::OffsetDateTime::now_utc().unix_timestamp() - 3600,
        }));
        assert!(decode_bearer_token(&t, SECRET).is_err());
    }

    #[test]
    fn missing_tenant_fails_tenant_scoped_access() {
        let t = token(json!({ "sub": "user-1", "exp": future_exp() }));
        let user = decode_bearer_token(&t, SECRET).unwrap();
        assert!(user.require_tenant().is_err());
        assert!(user.require_reviewer().is_err());
    }
}
