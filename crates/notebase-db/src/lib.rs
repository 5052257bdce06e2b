//! # notebase-db
//!
//! PostgreSQL database layer for notebase.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for all core entities
//! - Notebook-scoped vector search with pgvector
//! - Token-window document chunking
//! - Text extraction seams for uploaded documents
//!
//! ## Example
//!
//! ```rust,ignore
//! use notebase_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/notebase").await?;
//!     let notebooks = db.notebooks.list_visible(user_id).await?;
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod chunks;
pub mod documents;
pub mod extraction;
pub mod jobs;
pub mod notebooks;
pub mod pool;
pub mod raptor_nodes;
pub mod sessions;
pub mod users;

// Re-export core types
pub use notebase_core::*;

pub use chunking::{ChunkerConfig, ParagraphChunker, TextChunk, TextChunker, TokenWindowChunker};
pub use chunks::PgChunkRepository;
pub use documents::PgDocumentRepository;
pub use extraction::{detect_content_type, ExtractorRegistry, MarkdownExtractor, PlainTextExtractor, TextExtractor};
pub use jobs::PgJobRepository;
pub use notebooks::PgNotebookRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use raptor_nodes::PgSummaryNodeRepository;
pub use sessions::PgSessionRepository;
pub use users::PgUserRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Notebook repository (CRUD + access control).
    pub notebooks: PgNotebookRepository,
    /// Document repository (metadata + blobs).
    pub documents: PgDocumentRepository,
    /// Chunk repository (atomic storage + vector search).
    pub chunks: PgChunkRepository,
    /// Summary node repository (RAPTOR tree builds).
    pub summaries: PgSummaryNodeRepository,
    /// Session repository (conversation memory).
    pub sessions: PgSessionRepository,
    /// User and API key repository.
    pub users: PgUserRepository,
    /// Background job queue.
    pub jobs: PgJobRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notebooks: PgNotebookRepository::new(pool.clone()),
            documents: PgDocumentRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            summaries: PgSummaryNodeRepository::new(pool.clone()),
            sessions: PgSessionRepository::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Run embedded schema migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}
