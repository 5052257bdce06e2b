//! Notebook and document management endpoints.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use notebase_core::{
    Document, DocumentRepository, Error, JobRepository, JobType, NotebookRepository,
};
use notebase_db::extraction::{detect_content_type, ExtractorRegistry};

use crate::auth::RequireAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the caller's access level, failing closed on missing grants.
async fn require_access(
    state: &AppState,
    auth: &RequireAuth,
    notebook_id: Uuid,
) -> Result<(Uuid, notebase_core::AccessLevel), ApiError> {
    let user_id = auth
        .principal
        .user_id()
        .ok_or_else(|| Error::Unauthorized("no user behind principal".to_string()))?;

    let level = state
        .db
        .notebooks
        .access_level(notebook_id, user_id)
        .await?
        .ok_or(Error::NotebookNotFound(notebook_id))?;

    Ok((user_id, level))
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct CreateNotebookRequest {
    pub name: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CreateNotebookResponse {
    pub id: Uuid,
    pub name: String,
}

/// `POST /api/notebooks`: create a notebook owned by the caller.
pub async fn create_notebook(
    State(state): State<AppState>,
    auth: RequireAuth,
    Json(request): Json<CreateNotebookRequest>,
) -> Result<(StatusCode, Json<CreateNotebookResponse>), ApiError> {
    let user_id = auth
        .principal
        .user_id()
        .ok_or_else(|| Error::Unauthorized("no user behind principal".to_string()))?;

    let id = state.db.notebooks.create(&request.name, user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateNotebookResponse {
            id,
            name: request.name,
        }),
    ))
}

/// `DELETE /api/notebooks/{id}`: delete a notebook (owner only).
pub async fn delete_notebook(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(notebook_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let (_, level) = require_access(&state, &auth, notebook_id).await?;
    if !level.can_manage() {
        return Err(ApiError(Error::AccessDenied(
            "only the owner can delete a notebook".to_string(),
        )));
    }

    state.db.notebooks.delete(notebook_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
}

/// `GET /api/notebooks/{id}/documents`: list a notebook's documents.
pub async fn list_documents(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(notebook_id): Path<Uuid>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    require_access(&state, &auth, notebook_id).await?;
    let documents = state.db.documents.list_for_notebook(notebook_id).await?;
    Ok(Json(DocumentListResponse { documents }))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub status: String,
}

/// `POST /api/notebooks/{id}/documents`: upload a document (multipart
/// `file` field). The document is stored immediately and ingested
/// asynchronously; poll the document list for `ready`.
pub async fn upload_document(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(notebook_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let (_, level) = require_access(&state, &auth, notebook_id).await?;
    if !level.can_edit() {
        return Err(ApiError(Error::AccessDenied(
            "editor access required to upload documents".to_string(),
        )));
    }

    let mut upload: Option<(String, String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(String::from)
            .ok_or_else(|| Error::InvalidInput("file field needs a filename".to_string()))?;
        let declared = field
            .content_type()
            .map(String::from)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidInput(format!("failed to read upload: {}", e)))?
            .to_vec();
        upload = Some((filename, declared, data));
        break;
    }

    let (filename, declared, data) =
        upload.ok_or_else(|| Error::InvalidInput("multipart 'file' field required".to_string()))?;

    if data.is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "uploaded file is empty".to_string(),
        )));
    }
    if data.len() > state.config.ingestion.max_upload_bytes {
        return Err(ApiError(Error::Ingestion(format!(
            "upload exceeds size limit ({} bytes)",
            state.config.ingestion.max_upload_bytes
        ))));
    }

    // Reject formats the extractors cannot handle before persisting anything
    let content_type = detect_content_type(&data, &declared);
    if !ExtractorRegistry::new().supports(&content_type) {
        return Err(ApiError(Error::Ingestion(format!(
            "unsupported document format: {}",
            content_type
        ))));
    }

    let document_id = state
        .db
        .documents
        .insert(notebook_id, &filename, &content_type, &data)
        .await?;

    state
        .db
        .jobs
        .queue(
            JobType::Ingest,
            Some(notebook_id),
            Some(document_id),
            JobType::Ingest.default_priority(),
        )
        .await?;

    info!(
        subsystem = "api",
        op = "upload",
        notebook_id = %notebook_id,
        document_id = %document_id,
        size_bytes = data.len(),
        "Document accepted for ingestion"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document_id,
            status: "uploaded".to_string(),
        }),
    ))
}
