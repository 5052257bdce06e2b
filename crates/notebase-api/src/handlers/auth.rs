//! Authentication endpoints: login, me, logout, key regeneration, and the
//! first-run credential rotation.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use notebase_core::{defaults, ApiKeyKind, Error, User, UserRepository};

use crate::auth::{Auth, RequireAuth};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct LoginResponse {
    /// Session API key, shown exactly once.
    pub api_key: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
    /// True when the credential must be rotated before other calls succeed.
    pub must_rotate: bool,
}

/// `POST /api/auth/login`: verify credentials, mint a session key.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .db
        .users
        .verify_login(&request.username, &request.password)
        .await?
        .ok_or_else(|| Error::Unauthorized("invalid username or password".to_string()))?;

    let key = state
        .db
        .users
        .create_session_key(
            user.id,
            Duration::from_secs(defaults::SESSION_KEY_LIFETIME_SECS),
        )
        .await?;

    info!(
        subsystem = "api",
        op = "login",
        user_id = %user.id,
        "Login succeeded"
    );

    Ok(Json(LoginResponse {
        api_key: key.secret,
        expires_at: key.info.expires_at,
        must_rotate: user.must_rotate,
        user,
    }))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    pub user: User,
}

/// `GET /api/auth/me`: the caller's identity.
pub async fn me(
    State(state): State<AppState>,
    auth: RequireAuth,
) -> Result<Json<MeResponse>, ApiError> {
    let user_id = auth
        .principal
        .user_id()
        .ok_or_else(|| Error::Unauthorized("no user behind principal".to_string()))?;
    let user = state
        .db
        .users
        .get(user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;
    Ok(Json(MeResponse { user }))
}

/// `POST /api/auth/logout`: revoke the presenting session key.
pub async fn logout(
    State(state): State<AppState>,
    auth: RequireAuth,
) -> Result<StatusCode, ApiError> {
    if let notebase_core::AuthPrincipal::Key { key_id, kind, .. } = auth.principal {
        // Only session keys are revoked; logging out with the primary key
        // would brick API clients sharing it.
        if kind == ApiKeyKind::Session {
            state.db.users.revoke_key(key_id).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ApiKeyResponse {
    /// The new primary API key, shown exactly once.
    pub api_key: String,
}

/// `POST /api/auth/api-key`: revoke and regenerate the primary key.
pub async fn regenerate_api_key(
    State(state): State<AppState>,
    auth: RequireAuth,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let user_id = auth
        .principal
        .user_id()
        .ok_or_else(|| Error::Unauthorized("no user behind principal".to_string()))?;

    let key = state.db.users.regenerate_primary_key(user_id).await?;
    Ok(Json(ApiKeyResponse {
        api_key: key.secret,
    }))
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct RotateRequest {
    pub new_password: String,
}

/// `POST /api/auth/rotate`: first-run credential rotation.
///
/// Deliberately reachable while `must_rotate` is set: it is the only way
/// out of the rotation gate.
pub async fn rotate(
    State(state): State<AppState>,
    auth: Auth,
    Json(request): Json<RotateRequest>,
) -> Result<StatusCode, ApiError> {
    let user_id = auth
        .principal
        .user_id()
        .ok_or_else(|| Error::Unauthorized("valid X-API-Key required".to_string()))?;

    state
        .db
        .users
        .set_password(user_id, &request.new_password)
        .await?;

    info!(
        subsystem = "api",
        op = "rotate",
        user_id = %user_id,
        "Credential rotated"
    );
    Ok(StatusCode::NO_CONTENT)
}
