//! Query endpoints: `POST /api/query`, `GET /api/query/notebooks`,
//! `GET /api/models`.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use notebase_core::{Error, NotebookRepository, NotebookSummary, QueryRequest, QueryResponse};

use crate::auth::RequireAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/query`: run the retrieval-augmented query pipeline.
pub async fn query(
    State(state): State<AppState>,
    auth: RequireAuth,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let user_id = auth
        .principal
        .user_id()
        .ok_or_else(|| Error::Unauthorized("no user behind principal".to_string()))?;

    let notebook_id = request.notebook_id;
    let response = state.pipeline.execute(request, user_id).await?;

    info!(
        subsystem = "api",
        op = "query",
        notebook_id = %notebook_id,
        duration_ms = response.metadata.execution_time_ms,
        result_count = response.sources.len(),
        stateless = response.metadata.stateless,
        "Query served"
    );
    Ok(Json(response))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct NotebookListResponse {
    pub notebooks: Vec<NotebookSummary>,
}

/// `GET /api/query/notebooks`: notebooks visible to the caller.
pub async fn list_notebooks(
    State(state): State<AppState>,
    auth: RequireAuth,
) -> Result<Json<NotebookListResponse>, ApiError> {
    let user_id = auth
        .principal
        .user_id()
        .ok_or_else(|| Error::Unauthorized("no user behind principal".to_string()))?;

    let notebooks = state.db.notebooks.list_visible(user_id).await?;
    Ok(Json(NotebookListResponse { notebooks }))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ModelInfo {
    pub provider: String,
    pub default_model: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ModelListResponse {
    pub models: Vec<ModelInfo>,
}

/// `GET /api/models`: configured generation providers and default models.
pub async fn list_models(
    State(state): State<AppState>,
    _auth: RequireAuth,
) -> Json<ModelListResponse> {
    let models = state
        .registry
        .list_models()
        .into_iter()
        .map(|(provider, default_model)| ModelInfo {
            provider,
            default_model,
        })
        .collect();
    Json(ModelListResponse { models })
}
