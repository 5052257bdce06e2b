//! Chunk repository implementation.
//!
//! Chunk visibility is gated on the owning document being `ready`, and the
//! ready flip happens in the same transaction as the chunk insert. A document
//! whose embedding fails mid-way therefore never exposes a partial chunk set
//! to retrieval.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use notebase_core::{
    Candidate, Chunk, ChunkRepository, Error, NewChunk, Result, SourceKind,
};

/// PostgreSQL implementation of ChunkRepository.
#[derive(Clone)]
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    /// Create a new PgChunkRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn store_ready(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query("SELECT notebook_id FROM document WHERE id = $1 FOR UPDATE")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;
        let notebook_id: Uuid = match row {
            Some(row) => row.get("notebook_id"),
            None => return Err(Error::DocumentNotFound(document_id)),
        };

        sqlx::query("DELETE FROM chunk WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let chunk_count = chunks.len();
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunk (id, document_id, notebook_id, seq, text, token_count, embedding, model)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(document_id)
            .bind(notebook_id)
            .bind(chunk.seq)
            .bind(&chunk.text)
            .bind(chunk.token_count)
            .bind(&chunk.embedding)
            .bind(&chunk.model)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        sqlx::query(
            "UPDATE document SET status = 'ready', error = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "chunks",
            document_id = %document_id,
            notebook_id = %notebook_id,
            chunk_count,
            "Chunks stored, document ready"
        );
        Ok(())
    }

    async fn for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.notebook_id, c.seq, c.text, c.token_count,
                   c.embedding, c.model
            FROM chunk c
            JOIN document d ON d.id = c.document_id
            WHERE c.notebook_id = $1 AND d.status = 'ready'
            ORDER BY c.id
            "#,
        )
        .bind(notebook_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                notebook_id: row.get("notebook_id"),
                seq: row.get("seq"),
                text: row.get("text"),
                token_count: row.get("token_count"),
                embedding: row.get("embedding"),
                model: row.get("model"),
            })
            .collect())
    }

    async fn find_similar(
        &self,
        notebook_id: Uuid,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<Candidate>> {
        // notebook_id filter in SQL is the isolation invariant; UUIDv7 chunk
        // ids give a stable insertion-order tie-break on equal distances.
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.notebook_id, c.document_id, d.filename, c.seq, c.text,
                   1.0 - (c.embedding <=> $2) AS score
            FROM chunk c
            JOIN document d ON d.id = c.document_id
            WHERE c.notebook_id = $1 AND d.status = 'ready'
            ORDER BY c.embedding <=> $2, c.id
            LIMIT $3
            "#,
        )
        .bind(notebook_id)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Retrieval(format!("chunk search failed: {}", e)))?;

        let candidates: Vec<Candidate> = rows
            .into_iter()
            .map(|row| Candidate {
                id: row.get("id"),
                notebook_id: row.get("notebook_id"),
                document_id: row.get("document_id"),
                filename: row.get("filename"),
                kind: SourceKind::Chunk,
                level: 0,
                seq: row.get::<i32, _>("seq") as i64,
                text: row.get("text"),
                score: row.get::<f64, _>("score") as f32,
            })
            .collect();

        debug!(
            subsystem = "db",
            component = "chunks",
            op = "find_similar",
            notebook_id = %notebook_id,
            result_count = candidates.len(),
            "Chunk vector search complete"
        );
        Ok(candidates)
    }

    async fn count_for_notebook(&self, notebook_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM chunk c
            JOIN document d ON d.id = c.document_id
            WHERE c.notebook_id = $1 AND d.status = 'ready'
            "#,
        )
        .bind(notebook_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("count"))
    }
}
