//! Centralized default constants for the notebase system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates reference these constants instead of defining their own
//! magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// CHUNKING
// =============================================================================

/// Token window per chunk for document splitting.
pub const CHUNK_TOKENS: usize = 400;

/// Token overlap between adjacent chunks for context preservation.
pub const CHUNK_OVERLAP_TOKENS: usize = 40;

/// Minimum tokens per chunk (smaller trailing chunks are merged backward).
pub const CHUNK_MIN_TOKENS: usize = 20;

/// Maximum chunks a single document may produce.
pub const MAX_CHUNKS_PER_DOCUMENT: usize = 5_000;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding vector dimension (text-embedding-3-small and peers).
/// Must match the `vector(N)` column width in the migrations.
pub const EMBED_DIMENSION: usize = 1536;

/// Texts per embedding request.
pub const EMBED_BATCH_SIZE: usize = 32;

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Default number of candidates retrieved per query.
pub const TOP_K: usize = 6;

/// Upper bound on `top_k`.
pub const TOP_K_MAX: usize = 50;

/// Default number of sources returned after reranking.
pub const MAX_SOURCES: usize = 6;

/// Upper bound on `max_sources`.
pub const MAX_SOURCES_MAX: usize = 20;

/// Snippet length in characters for source previews.
pub const SNIPPET_LENGTH: usize = 200;

// =============================================================================
// RAPTOR TREE
// =============================================================================

/// Maximum summary tree height above the chunk layer.
pub const RAPTOR_MAX_DEPTH: usize = 4;

/// Maximum children per summary node.
pub const RAPTOR_BRANCHING_FACTOR: usize = 8;

/// Minimum cluster size worth summarizing; smaller clusters carry forward.
pub const RAPTOR_MIN_CLUSTER_SIZE: usize = 2;

/// Cosine similarity floor for joining an existing cluster.
pub const RAPTOR_SIMILARITY_THRESHOLD: f32 = 0.5;

/// Token budget for the text fed into one cluster summary.
pub const RAPTOR_SUMMARY_INPUT_TOKENS: usize = 3_000;

// =============================================================================
// SESSIONS
// =============================================================================

/// Default history turns injected into the prompt.
pub const MAX_HISTORY: usize = 5;

/// Upper bound on `max_history`.
pub const MAX_HISTORY_MAX: usize = 20;

/// Idle seconds before a session transitions to expired (1 hour).
pub const SESSION_TTL_SECS: u64 = 3_600;

/// Grace seconds an expired session is kept before garbage collection (24h).
pub const SESSION_GRACE_SECS: u64 = 86_400;

// =============================================================================
// SYNTHESIS
// =============================================================================

/// Token budget for assembled context (sources + history), excluding the
/// query itself. Conservative fit for 16k-context models.
pub const CONTEXT_TOKEN_BUDGET: usize = 8_000;

/// Timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Whole-query pipeline timeout in seconds.
pub const QUERY_TIMEOUT_SECS: u64 = 120;

/// Backoff before the single synthesis retry, in milliseconds.
pub const SYNTHESIS_RETRY_BACKOFF_MS: u64 = 500;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port (matches the documented deployment).
pub const SERVER_PORT: u16 = 7860;

/// Default rate limit: max requests per period.
pub const RATE_LIMIT_REQUESTS: u64 = 100;

/// Default rate limit: period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Maximum request body size in bytes for JSON endpoints (2 MB).
pub const MAX_BODY_SIZE_BYTES: usize = 2 * 1024 * 1024;

/// Maximum document upload size in bytes (50 MB).
pub const MAX_UPLOAD_SIZE_BYTES: usize = 50 * 1024 * 1024;

// =============================================================================
// AUTH
// =============================================================================

/// Prefix carried by every API key.
pub const API_KEY_PREFIX: &str = "dbn_";

/// Random bytes behind an API key secret (hex-encoded to 32 chars).
pub const API_KEY_SECRET_BYTES: usize = 16;

/// Lifetime of login session keys in seconds (24 hours).
pub const SESSION_KEY_LIFETIME_SECS: u64 = 86_400;

/// Minimum password length accepted by rotation and user creation.
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Bootstrap admin username created on first run.
pub const BOOTSTRAP_ADMIN_USERNAME: &str = "admin";

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum retry count for failed jobs.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Base delay for exponential retry backoff, in seconds.
pub const JOB_RETRY_BASE_SECS: u64 = 5;

/// Default job worker poll interval when the queue is empty, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Interval between queued session GC sweeps, in seconds.
pub const SESSION_GC_INTERVAL_SECS: u64 = 600;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default Ollama generation model.
pub const OLLAMA_GEN_MODEL: &str = "llama3.1:latest";

/// Default Ollama embedding model.
pub const OLLAMA_EMBED_MODEL: &str = "nomic-embed-text";

/// Default OpenAI generation model.
pub const OPENAI_GEN_MODEL: &str = "gpt-4.1-mini";

/// Default OpenAI embedding model.
pub const OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";
