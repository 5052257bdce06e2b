//! Admin endpoints: user management and notebook access grants.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use notebase_core::{AccessLevel, Error, NotebookRepository, Role, User, UserRepository};

use crate::auth::RequireAdmin;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Member
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CreateUserResponse {
    pub user: User,
    /// The user's primary API key, shown exactly once.
    pub api_key: String,
}

/// `POST /api/admin/users`: create a user and their primary key.
pub async fn create_user(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    let (user, key) = state
        .db
        .users
        .create_user(&request.username, &request.password, request.role, false)
        .await?;

    info!(
        subsystem = "api",
        op = "create_user",
        user_id = %user.id,
        role = %request.role,
        "User created by admin"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user,
            api_key: key.secret,
        }),
    ))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct UserListResponse {
    pub users: Vec<User>,
}

/// `GET /api/admin/users`: list all users.
pub async fn list_users(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Result<Json<UserListResponse>, ApiError> {
    let users = state.db.users.list().await?;
    Ok(Json(UserListResponse { users }))
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SetAccessRequest {
    pub user_id: Uuid,
    /// `null` revokes the grant.
    pub level: Option<AccessLevel>,
}

/// `POST /api/admin/notebooks/{id}/access`: grant or revoke access.
pub async fn set_access(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(notebook_id): Path<Uuid>,
    Json(request): Json<SetAccessRequest>,
) -> Result<StatusCode, ApiError> {
    // Verify targets exist so typos do not silently no-op
    if state.db.notebooks.get(notebook_id).await?.is_none() {
        return Err(ApiError(Error::NotebookNotFound(notebook_id)));
    }
    if state.db.users.get(request.user_id).await?.is_none() {
        return Err(ApiError(Error::NotFound(format!(
            "user {}",
            request.user_id
        ))));
    }

    state
        .db
        .notebooks
        .set_access(notebook_id, request.user_id, request.level)
        .await?;

    info!(
        subsystem = "api",
        op = "set_access",
        notebook_id = %notebook_id,
        target_user = %request.user_id,
        level = ?request.level,
        "Notebook access updated"
    );
    Ok(StatusCode::NO_CONTENT)
}
