//! Core data model for notebase.
//!
//! Rows and request/response DTOs shared across the workspace. Persistence
//! lives in `notebase-db`; these types are storage-agnostic.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// ACCESS CONTROL
// =============================================================================

/// Per-notebook access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Owner,
    Editor,
    Viewer,
}

impl AccessLevel {
    /// Can this level run queries and read documents?
    pub fn can_read(&self) -> bool {
        true
    }

    /// Can this level upload documents and trigger rebuilds?
    pub fn can_edit(&self) -> bool {
        matches!(self, Self::Owner | Self::Editor)
    }

    /// Can this level delete the notebook or manage access?
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner)
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Editor => write!(f, "editor"),
            Self::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            _ => Err(Error::InvalidInput(format!("Invalid access level: {}", s))),
        }
    }
}

/// User role for RBAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Member => write!(f, "member"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(Error::InvalidInput(format!("Invalid role: {}", s))),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    /// True until the bootstrap credential has been rotated.
    pub must_rotate: bool,
    pub created_at: DateTime<Utc>,
}

/// Kind of an API key secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyKind {
    /// Long-lived per-user key, regenerable via the auth API.
    Primary,
    /// Short-lived key minted by login, revoked by logout.
    Session,
}

impl std::fmt::Display for ApiKeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Session => write!(f, "session"),
        }
    }
}

impl std::str::FromStr for ApiKeyKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Self::Primary),
            "session" => Ok(Self::Session),
            _ => Err(Error::InvalidInput(format!("Invalid key kind: {}", s))),
        }
    }
}

/// API key metadata. The secret itself is only ever returned at creation.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: ApiKeyKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// NOTEBOOK / DOCUMENT
// =============================================================================

/// Logical container of documents, chunks, summary tree, and sessions.
#[derive(Debug, Clone, Serialize)]
pub struct Notebook {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    /// Currently served RAPTOR build. `None` until the first build completes.
    pub active_build: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Notebook listing row for the query API.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotebookSummary {
    pub id: Uuid,
    pub name: String,
    pub document_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Document ingestion lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uploaded => write!(f, "uploaded"),
            Self::Processing => write!(f, "processing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(Error::InvalidInput(format!(
                "Invalid document status: {}",
                s
            ))),
        }
    }
}

/// An uploaded document. Belongs to exactly one notebook.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct Document {
    pub id: Uuid,
    pub notebook_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// CHUNK / SUMMARY NODE
// =============================================================================

/// Smallest indexed unit: a contiguous span of document text plus its
/// embedding. Immutable once created; regenerated only by reprocessing.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub notebook_id: Uuid,
    /// Insertion order within the document. Retrieval tie-break key.
    pub seq: i32,
    pub text: String,
    pub token_count: i32,
    pub embedding: Vector,
    pub model: String,
}

/// A chunk ready for insertion (ids assigned by the repository).
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub seq: i32,
    pub text: String,
    pub token_count: i32,
    pub embedding: Vector,
    /// Embedding model that produced the vector.
    pub model: String,
}

/// A RAPTOR summary tree node. Level 1 summarizes chunks directly; higher
/// levels summarize lower summary nodes. Scoped to one build of one notebook.
#[derive(Debug, Clone)]
pub struct SummaryNode {
    pub id: Uuid,
    pub notebook_id: Uuid,
    pub build_id: Uuid,
    pub level: i32,
    pub parent_id: Option<Uuid>,
    pub child_ids: Vec<Uuid>,
    pub child_chunk_ids: Vec<Uuid>,
    pub text: String,
    pub embedding: Vector,
}

/// A summary node ready for insertion. Ids are assigned by the builder so
/// parent/child links exist before anything is persisted.
#[derive(Debug, Clone)]
pub struct NewSummaryNode {
    pub id: Uuid,
    pub level: i32,
    pub parent_id: Option<Uuid>,
    pub child_ids: Vec<Uuid>,
    pub child_chunk_ids: Vec<Uuid>,
    pub text: String,
    pub embedding: Vector,
}

/// What a retrieval candidate points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Chunk,
    Summary,
}

/// A retrieval candidate: a chunk or summary node with its similarity score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: Uuid,
    pub notebook_id: Uuid,
    /// Owning document for chunks; `None` for summary nodes.
    pub document_id: Option<Uuid>,
    pub filename: Option<String>,
    pub kind: SourceKind,
    /// Tree level for summaries, 0 for chunks.
    pub level: i32,
    /// Insertion-order tie-break key (chunk seq; 0 for summaries).
    pub seq: i64,
    pub text: String,
    pub score: f32,
}

// =============================================================================
// SESSION
// =============================================================================

/// Session lifecycle. `Active` sessions idle past the TTL become `Expired`;
/// expired sessions are excluded from context and garbage-collected after a
/// grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Expired,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for SessionState {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            _ => Err(Error::InvalidInput(format!("Invalid session state: {}", s))),
        }
    }
}

/// A multi-turn conversation, owned by one (notebook, user) pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub notebook_id: Uuid,
    pub user_id: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// One recorded (query, answer) turn plus the sources its answer cited.
#[derive(Debug, Clone)]
pub struct SessionTurn {
    pub id: Uuid,
    pub session_id: Uuid,
    pub seq: i32,
    pub query: String,
    pub answer: String,
    pub source_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// JOBS
// =============================================================================

/// Background job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Chunk + embed one document.
    Ingest,
    /// Rebuild the RAPTOR tree for one notebook.
    RaptorBuild,
    /// Expire idle sessions and purge expired ones past grace.
    SessionGc,
}

impl JobType {
    /// Default queue priority (1 = highest, 10 = lowest).
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Ingest => 3,
            Self::RaptorBuild => 5,
            Self::SessionGc => 8,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::RaptorBuild => write!(f, "raptor_build"),
            Self::SessionGc => write!(f, "session_gc"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ingest" => Ok(Self::Ingest),
            "raptor_build" => Ok(Self::RaptorBuild),
            "session_gc" => Ok(Self::SessionGc),
            _ => Err(Error::InvalidInput(format!("Invalid job type: {}", s))),
        }
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(Error::InvalidInput(format!("Invalid job status: {}", s))),
        }
    }
}

/// A queued background job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub notebook_id: Option<Uuid>,
    pub document_id: Option<Uuid>,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_run_at: DateTime<Utc>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

// =============================================================================
// QUERY API
// =============================================================================

fn default_top_k() -> usize {
    defaults::TOP_K
}

fn default_max_sources() -> usize {
    defaults::MAX_SOURCES
}

fn default_max_history() -> usize {
    defaults::MAX_HISTORY
}

fn default_true() -> bool {
    true
}

/// Request body for `POST /api/query`.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct QueryRequest {
    pub notebook_id: Uuid,
    pub query: String,
    /// Client-generated conversation id. Omit for a stateless query.
    pub session_id: Option<Uuid>,
    /// Model slug, optionally provider-qualified. Provider is auto-detected
    /// from well-known model name shapes when unqualified.
    pub model: Option<String>,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_true")]
    pub reranker_enabled: bool,
    #[serde(default = "default_true")]
    pub skip_raptor: bool,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_true")]
    pub include_sources: bool,
    /// Model slug for the reranker pass.
    pub reranker_model: Option<String>,
}

impl QueryRequest {
    /// Validate and clamp tunables to their documented bounds.
    pub fn validate(&mut self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        if self.top_k == 0 || self.top_k > defaults::TOP_K_MAX {
            return Err(Error::InvalidInput(format!(
                "top_k must be in 1..={}",
                defaults::TOP_K_MAX
            )));
        }
        if self.max_sources == 0 || self.max_sources > defaults::MAX_SOURCES_MAX {
            return Err(Error::InvalidInput(format!(
                "max_sources must be in 1..={}",
                defaults::MAX_SOURCES_MAX
            )));
        }
        if self.max_history == 0 || self.max_history > defaults::MAX_HISTORY_MAX {
            return Err(Error::InvalidInput(format!(
                "max_history must be in 1..={}",
                defaults::MAX_HISTORY_MAX
            )));
        }
        Ok(())
    }
}

/// A cited source in a query response.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QuerySource {
    pub document_id: Option<Uuid>,
    pub filename: String,
    pub kind: SourceKind,
    pub score: f32,
    pub snippet: String,
}

/// Per-stage wall-clock timings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QueryTimings {
    pub embed_ms: u64,
    pub retrieval_ms: u64,
    pub rerank_ms: u64,
    pub synthesis_ms: u64,
}

/// Query response metadata.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QueryMetadata {
    pub execution_time_ms: u64,
    pub model: String,
    /// True when no session memory was consulted (no session, or expired).
    pub stateless: bool,
    /// Candidates that reached the synthesizer.
    pub node_count: usize,
    pub history_messages_used: usize,
    /// Set when the presented session had expired; the query proceeded
    /// without memory.
    pub session_expired: bool,
    pub timings: QueryTimings,
}

/// Response body for `POST /api/query`.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QueryResponse {
    pub response: String,
    pub sources: Vec<QuerySource>,
    pub metadata: QueryMetadata,
}

impl Candidate {
    /// Render this candidate as a response source.
    pub fn to_source(&self) -> QuerySource {
        let snippet: String = self.text.chars().take(defaults::SNIPPET_LENGTH).collect();
        QuerySource {
            document_id: self.document_id,
            filename: self
                .filename
                .clone()
                .unwrap_or_else(|| format!("summary (level {})", self.level)),
            kind: self.kind,
            score: self.score,
            snippet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> QueryRequest {
        serde_json::from_value(serde_json::json!({
            "notebook_id": Uuid::new_v4(),
            "query": "What is the leave policy?"
        }))
        .unwrap()
    }

    #[test]
    fn query_request_defaults_match_docs() {
        let req = base_request();
        assert_eq!(req.top_k, 6);
        assert_eq!(req.max_sources, 6);
        assert_eq!(req.max_history, 5);
        assert!(req.reranker_enabled);
        assert!(req.skip_raptor);
        assert!(req.include_sources);
        assert!(req.session_id.is_none());
        assert!(req.model.is_none());
    }

    #[test]
    fn query_request_rejects_empty_query() {
        let mut req = base_request();
        req.query = "   ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn query_request_rejects_out_of_range_top_k() {
        let mut req = base_request();
        req.top_k = 0;
        assert!(req.validate().is_err());
        req.top_k = 51;
        assert!(req.validate().is_err());
        req.top_k = 50;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn query_request_rejects_out_of_range_max_sources() {
        let mut req = base_request();
        req.max_sources = 21;
        assert!(req.validate().is_err());
        req.max_sources = 20;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn access_level_permissions() {
        assert!(AccessLevel::Owner.can_manage());
        assert!(AccessLevel::Owner.can_edit());
        assert!(AccessLevel::Editor.can_edit());
        assert!(!AccessLevel::Editor.can_manage());
        assert!(AccessLevel::Viewer.can_read());
        assert!(!AccessLevel::Viewer.can_edit());
    }

    #[test]
    fn access_level_roundtrip() {
        for (level, s) in [
            (AccessLevel::Owner, "owner"),
            (AccessLevel::Editor, "editor"),
            (AccessLevel::Viewer, "viewer"),
        ] {
            assert_eq!(level.to_string(), s);
            assert_eq!(s.parse::<AccessLevel>().unwrap(), level);
        }
        assert!("root".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn document_status_roundtrip() {
        for (status, s) in [
            (DocumentStatus::Uploaded, "uploaded"),
            (DocumentStatus::Processing, "processing"),
            (DocumentStatus::Ready, "ready"),
            (DocumentStatus::Failed, "failed"),
        ] {
            assert_eq!(status.to_string(), s);
            assert_eq!(s.parse::<DocumentStatus>().unwrap(), status);
        }
    }

    #[test]
    fn job_type_roundtrip_and_priorities() {
        for (jt, s) in [
            (JobType::Ingest, "ingest"),
            (JobType::RaptorBuild, "raptor_build"),
            (JobType::SessionGc, "session_gc"),
        ] {
            assert_eq!(jt.to_string(), s);
            assert_eq!(s.parse::<JobType>().unwrap(), jt);
        }
        // Ingestion outranks tree rebuilds, which outrank GC
        assert!(JobType::Ingest.default_priority() < JobType::RaptorBuild.default_priority());
        assert!(JobType::RaptorBuild.default_priority() < JobType::SessionGc.default_priority());
    }

    #[test]
    fn candidate_source_snippet_is_bounded() {
        let candidate = Candidate {
            id: Uuid::new_v4(),
            notebook_id: Uuid::new_v4(),
            document_id: Some(Uuid::new_v4()),
            filename: Some("policy.md".to_string()),
            kind: SourceKind::Chunk,
            level: 0,
            seq: 0,
            text: "x".repeat(1000),
            score: 0.9,
        };
        let source = candidate.to_source();
        assert_eq!(source.snippet.len(), crate::defaults::SNIPPET_LENGTH);
        assert_eq!(source.filename, "policy.md");
    }

    #[test]
    fn summary_candidate_source_names_level() {
        let candidate = Candidate {
            id: Uuid::new_v4(),
            notebook_id: Uuid::new_v4(),
            document_id: None,
            filename: None,
            kind: SourceKind::Summary,
            level: 2,
            seq: 0,
            text: "a summary".to_string(),
            score: 0.5,
        };
        let source = candidate.to_source();
        assert_eq!(source.filename, "summary (level 2)");
        assert_eq!(source.kind, SourceKind::Summary);
    }
}
