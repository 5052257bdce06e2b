//! Core traits for notebase abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability. Postgres
//! implementations live in `notebase-db`; tests use in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::Vector;

// =============================================================================
// NOTEBOOK REPOSITORY
// =============================================================================

/// Repository for notebook CRUD and access control.
#[async_trait]
pub trait NotebookRepository: Send + Sync {
    /// Create a notebook; the owner receives an `owner` access grant.
    async fn create(&self, name: &str, owner_id: Uuid) -> Result<Uuid>;

    /// Fetch a notebook by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Notebook>>;

    /// List notebooks visible to the given user, with document counts.
    async fn list_visible(&self, user_id: Uuid) -> Result<Vec<NotebookSummary>>;

    /// Delete a notebook. Cascades to documents, chunks, summary nodes,
    /// sessions, and access grants.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Grant (`Some(level)`) or revoke (`None`) a user's access.
    async fn set_access(
        &self,
        notebook_id: Uuid,
        user_id: Uuid,
        level: Option<AccessLevel>,
    ) -> Result<()>;

    /// The user's effective access level, or `None` when the notebook does
    /// not exist or the user has no grant. Callers must treat both cases
    /// identically (fail closed).
    async fn access_level(&self, notebook_id: Uuid, user_id: Uuid) -> Result<Option<AccessLevel>>;

    /// Point queries at a new RAPTOR build (or clear the pointer).
    async fn set_active_build(&self, notebook_id: Uuid, build_id: Option<Uuid>) -> Result<()>;
}

// =============================================================================
// DOCUMENT REPOSITORY
// =============================================================================

/// Repository for document metadata and raw blobs.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a freshly uploaded document and its raw bytes.
    async fn insert(
        &self,
        notebook_id: Uuid,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Uuid>;

    /// Fetch a document by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Document>>;

    /// List a notebook's documents, newest first.
    async fn list_for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Document>>;

    /// Transition the document lifecycle state, recording the error for
    /// `Failed`.
    async fn set_status(&self, id: Uuid, status: DocumentStatus, error: Option<&str>)
        -> Result<()>;

    /// Load the raw uploaded bytes.
    async fn load_blob(&self, id: Uuid) -> Result<Vec<u8>>;
}

// =============================================================================
// CHUNK REPOSITORY
// =============================================================================

/// Repository for chunk storage and notebook-scoped vector search.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Atomically replace the document's chunks and mark it `ready`.
    ///
    /// All-or-nothing: on any failure the document keeps its previous state
    /// and zero new chunks are visible to retrieval.
    async fn store_ready(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<()>;

    /// All chunks of every `ready` document in a notebook, in insertion
    /// order. RAPTOR build input.
    async fn for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Chunk>>;

    /// Nearest-neighbor search over one notebook's chunks.
    ///
    /// Hard isolation invariant: results are filtered by `notebook_id` in the
    /// query itself and only chunks of `ready` documents are visible.
    async fn find_similar(
        &self,
        notebook_id: Uuid,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<Candidate>>;

    /// Count visible chunks in a notebook.
    async fn count_for_notebook(&self, notebook_id: Uuid) -> Result<i64>;
}

// =============================================================================
// SUMMARY NODE REPOSITORY
// =============================================================================

/// Repository for RAPTOR summary nodes, versioned by build.
#[async_trait]
pub trait SummaryNodeRepository: Send + Sync {
    /// Insert a complete build's nodes under `build_id`. The build is
    /// invisible to queries until activated.
    async fn insert_build(
        &self,
        notebook_id: Uuid,
        build_id: Uuid,
        nodes: Vec<NewSummaryNode>,
    ) -> Result<()>;

    /// Atomically flip the notebook's active build pointer and prune nodes
    /// of superseded builds. Queries in flight keep their snapshot.
    async fn activate_build(&self, notebook_id: Uuid, build_id: Uuid) -> Result<()>;

    /// Nearest-neighbor search over the notebook's *active* build only.
    async fn find_similar(
        &self,
        notebook_id: Uuid,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<Candidate>>;

    /// Node count in the active build.
    async fn node_count(&self, notebook_id: Uuid) -> Result<i64>;
}

// =============================================================================
// SESSION REPOSITORY
// =============================================================================

/// Repository for conversation sessions and turns.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Fetch or create the session, applying idle expiry with the given TTL.
    ///
    /// A session idle longer than `ttl` is transitioned to `Expired` before
    /// being returned. Fails with `AccessDenied` when the session exists but
    /// belongs to a different (notebook, user) pair.
    async fn get_or_create(
        &self,
        id: Uuid,
        notebook_id: Uuid,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<Session>;

    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(&self, session_id: Uuid, limit: i64) -> Result<Vec<SessionTurn>>;

    /// Append a completed turn and refresh the session's activity time.
    async fn append_turn(
        &self,
        session_id: Uuid,
        query: &str,
        answer: &str,
        source_ids: &[Uuid],
    ) -> Result<()>;

    /// Transition sessions idle longer than `ttl` to `Expired`.
    /// Returns how many sessions were expired.
    async fn expire_idle(&self, ttl: Duration) -> Result<u64>;

    /// Delete expired sessions idle longer than `grace`.
    /// Returns how many sessions were purged.
    async fn purge_expired(&self, grace: Duration) -> Result<u64>;
}

// =============================================================================
// USER REPOSITORY
// =============================================================================

/// A freshly issued API key: metadata plus the secret, shown exactly once.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub info: ApiKeyInfo,
    pub secret: String,
}

/// Repository for users, credentials, and API keys.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a user with an argon2id-hashed password. Also issues the
    /// user's primary API key.
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
        must_rotate: bool,
    ) -> Result<(User, IssuedKey)>;

    /// Fetch a user by ID.
    async fn get(&self, id: Uuid) -> Result<Option<User>>;

    /// List all users.
    async fn list(&self) -> Result<Vec<User>>;

    /// Verify a username/password login.
    async fn verify_login(&self, username: &str, password: &str) -> Result<Option<User>>;

    /// Replace the user's password and clear the rotation gate.
    async fn set_password(&self, user_id: Uuid, password: &str) -> Result<()>;

    /// Revoke the current primary key and issue a fresh one.
    async fn regenerate_primary_key(&self, user_id: Uuid) -> Result<IssuedKey>;

    /// Issue a short-lived session key (login).
    async fn create_session_key(&self, user_id: Uuid, lifetime: Duration) -> Result<IssuedKey>;

    /// Validate a presented secret; returns the owning user and key metadata
    /// for live, unexpired keys.
    async fn validate_key(&self, secret: &str) -> Result<Option<(User, ApiKeyInfo)>>;

    /// Revoke one key by ID.
    async fn revoke_key(&self, key_id: Uuid) -> Result<()>;

    /// Count registered users. Used by first-run bootstrap.
    async fn count(&self) -> Result<i64>;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Repository for the background job queue.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a new job.
    async fn queue(
        &self,
        job_type: JobType,
        notebook_id: Option<Uuid>,
        document_id: Option<Uuid>,
        priority: i32,
    ) -> Result<Uuid>;

    /// Queue a job unless an identical (type, notebook, document) job is
    /// already pending. Returns `None` when deduplicated.
    async fn queue_deduplicated(
        &self,
        job_type: JobType,
        notebook_id: Option<Uuid>,
        document_id: Option<Uuid>,
        priority: i32,
    ) -> Result<Option<Uuid>>;

    /// Claim the next runnable job whose type is in `job_types`.
    /// An empty slice means "claim any type".
    async fn claim_next(&self, job_types: &[JobType]) -> Result<Option<Job>>;

    /// Mark a job completed.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Mark a job failed.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Return a job to the queue for retry after `delay`, incrementing its
    /// retry count.
    async fn retry_later(&self, job_id: Uuid, error: &str, delay: Duration) -> Result<()>;

    /// Pending jobs count.
    async fn pending_count(&self) -> Result<i64>;

    /// Aggregate queue statistics.
    async fn stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// INFERENCE BACKENDS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Combined inference backend supporting both embedding and generation.
#[async_trait]
pub trait InferenceBackend: EmbeddingBackend + GenerationBackend {
    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;
}

/// Resolves an optional model slug to a generation backend.
///
/// Implemented by the provider registry in `notebase-inference`; the query
/// pipeline only needs this seam, keeping `notebase-retrieval` free of
/// provider wiring.
pub trait ModelResolver: Send + Sync {
    /// `None` resolves to the configured default backend.
    fn resolve(&self, slug: Option<&str>) -> Result<Arc<dyn GenerationBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_key_is_cloneable() {
        let key = IssuedKey {
            info: ApiKeyInfo {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                kind: ApiKeyKind::Primary,
                created_at: chrono::Utc::now(),
                expires_at: None,
            },
            secret: "dbn_0123456789abcdef0123456789abcdef".to_string(),
        };
        let cloned = key.clone();
        assert_eq!(cloned.secret, key.secret);
        assert_eq!(cloned.info.id, key.info.id);
    }

    #[test]
    fn trait_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}

        assert_send_sync::<dyn NotebookRepository>();
        assert_send_sync::<dyn ChunkRepository>();
        assert_send_sync::<dyn SummaryNodeRepository>();
        assert_send_sync::<dyn SessionRepository>();
        assert_send_sync::<dyn EmbeddingBackend>();
        assert_send_sync::<dyn GenerationBackend>();
        assert_send_sync::<dyn ModelResolver>();
    }
}
