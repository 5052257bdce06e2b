//! HTTP error mapping for the core error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use notebase_core::Error;

/// API-facing error wrapper. Converts the core taxonomy into HTTP responses
/// with JSON bodies; degradable errors never reach this type because the
/// pipeline absorbs them.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": msg }),
            ),
            Error::AccessDenied(msg) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": msg }),
            ),
            // Fails closed: invisible and missing notebooks are the same 404
            Error::NotebookNotFound(id) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("Notebook not found: {}", id) }),
            ),
            Error::DocumentNotFound(id) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("Document not found: {}", id) }),
            ),
            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": msg }),
            ),
            Error::Timeout(secs) => (
                StatusCode::GATEWAY_TIMEOUT,
                serde_json::json!({ "error": format!("query timed out after {}s", secs) }),
            ),
            Error::Synthesis {
                message,
                partial_context,
            } => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": message,
                    "partial_context": partial_context,
                }),
            ),
            Error::Retrieval(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": msg }),
            ),
            Error::Ingestion(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": msg }),
            ),
            other => {
                tracing::error!(
                    subsystem = "api",
                    error = %other,
                    "Internal error surfaced to client"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
