//! Error types for notebase.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using notebase's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for notebase operations.
///
/// Variants mirror the pipeline stages: ingestion failures are retried a
/// bounded number of times, rerank failures degrade to pass-through, and
/// cross-notebook access always fails closed.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Notebook not found or not visible to the caller.
    ///
    /// Deliberately also returned for notebooks that exist but are not
    /// accessible, so callers cannot probe for notebook existence.
    #[error("Notebook not found: {0}")]
    NotebookNotFound(Uuid),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    /// Document ingestion failed (bad format, size limit, embedding failure)
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Vector retrieval failed (index unavailable). Fails the request.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Reranker failed. Non-fatal: callers degrade to pass-through ranking.
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// Answer synthesis failed after retry. Carries the chunk/node ids that
    /// were assembled into the prompt so the caller can diagnose what context
    /// the failed generation saw.
    #[error("Synthesis error: {message}")]
    Synthesis {
        message: String,
        partial_context: Vec<Uuid>,
    },

    /// RBAC or rotation-gate violation. Fails closed.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Session idle past its TTL. Non-fatal: the query proceeds without
    /// memory and the response carries a flag.
    #[error("Session expired: {0}")]
    SessionExpired(Uuid),

    /// Authentication failed or missing
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Request exceeded its configured timeout. Partial output is discarded.
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl Error {
    /// True for errors that degrade gracefully rather than failing the query.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::Rerank(_) | Error::SessionExpired(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_notebook_not_found() {
        let id = Uuid::nil();
        let err = Error::NotebookNotFound(id);
        assert_eq!(err.to_string(), format!("Notebook not found: {}", id));
    }

    #[test]
    fn test_error_display_ingestion() {
        let err = Error::Ingestion("unsupported format".to_string());
        assert_eq!(err.to_string(), "Ingestion error: unsupported format");
    }

    #[test]
    fn test_error_display_retrieval() {
        let err = Error::Retrieval("index unavailable".to_string());
        assert_eq!(err.to_string(), "Retrieval error: index unavailable");
    }

    #[test]
    fn test_error_display_synthesis_carries_context() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let err = Error::Synthesis {
            message: "provider failure".to_string(),
            partial_context: ids.clone(),
        };
        assert_eq!(err.to_string(), "Synthesis error: provider failure");
        match err {
            Error::Synthesis {
                partial_context, ..
            } => assert_eq!(partial_context, ids),
            _ => panic!("Expected Synthesis error"),
        }
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout(120);
        assert_eq!(err.to_string(), "Timed out after 120s");
    }

    #[test]
    fn test_degradable_classification() {
        assert!(Error::Rerank("scoring failed".to_string()).is_degradable());
        assert!(Error::SessionExpired(Uuid::nil()).is_degradable());
        assert!(!Error::Retrieval("down".to_string()).is_degradable());
        assert!(!Error::AccessDenied("no".to_string()).is_degradable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
