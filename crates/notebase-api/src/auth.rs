//! Authentication extractors over the `X-API-Key` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use notebase_core::{AuthPrincipal, Error, UserRepository};

use crate::error::ApiError;
use crate::state::AppState;

/// Extractor that resolves the request's principal without requiring one.
///
/// Endpoints that must work before the rotation gate (`/api/auth/rotate`)
/// use this and check authentication by hand.
#[derive(Debug, Clone)]
pub struct Auth {
    pub principal: AuthPrincipal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let principal = match secret {
            Some(secret) => match state.db.users.validate_key(secret).await? {
                Some((user, key)) => AuthPrincipal::Key {
                    user_id: user.id,
                    role: user.role,
                    key_id: key.id,
                    kind: key.kind,
                    must_rotate: user.must_rotate,
                },
                None => AuthPrincipal::Anonymous,
            },
            None => AuthPrincipal::Anonymous,
        };

        Ok(Auth { principal })
    }
}

/// Extractor that requires a valid key and a rotated credential.
///
/// While the bootstrap credential is unrotated, every endpoint behind this
/// extractor answers 403 so the deployment cannot be used with a known
/// default password.
#[derive(Debug, Clone)]
pub struct RequireAuth {
    pub principal: AuthPrincipal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = Auth::from_request_parts(parts, state).await?;

        if !auth.principal.is_authenticated() {
            return Err(ApiError(Error::Unauthorized(
                "valid X-API-Key required".to_string(),
            )));
        }

        if auth.principal.must_rotate() {
            return Err(ApiError(Error::AccessDenied(
                "credential rotation required: POST /api/auth/rotate".to_string(),
            )));
        }

        Ok(RequireAuth {
            principal: auth.principal,
        })
    }
}

/// Extractor that additionally requires the admin role.
#[derive(Debug, Clone)]
pub struct RequireAdmin {
    pub principal: AuthPrincipal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = RequireAuth::from_request_parts(parts, state).await?;

        if !auth.principal.is_admin() {
            return Err(ApiError(Error::AccessDenied(
                "admin role required".to_string(),
            )));
        }

        Ok(RequireAdmin {
            principal: auth.principal,
        })
    }
}
