//! Document repository implementation.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use notebase_core::{Document, DocumentRepository, DocumentStatus, Error, Result};

/// PostgreSQL implementation of DocumentRepository.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    /// Create a new PgDocumentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<Document> {
        let status: String = row.get("status");
        Ok(Document {
            id: row.get("id"),
            notebook_id: row.get("notebook_id"),
            filename: row.get("filename"),
            content_type: row.get("content_type"),
            content_hash: row.get("content_hash"),
            size_bytes: row.get("size_bytes"),
            status: status.parse()?,
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn insert(
        &self,
        notebook_id: Uuid,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let content_hash = hex::encode(Sha256::digest(data));

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            r#"
            INSERT INTO document (id, notebook_id, filename, content_type, content_hash, size_bytes, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'uploaded')
            "#,
        )
        .bind(id)
        .bind(notebook_id)
        .bind(filename)
        .bind(content_type)
        .bind(&content_hash)
        .bind(data.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("INSERT INTO document_blob (document_id, data) VALUES ($1, $2)")
            .bind(id)
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "documents",
            document_id = %id,
            notebook_id = %notebook_id,
            size_bytes = data.len(),
            "Document uploaded"
        );
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, notebook_id, filename, content_type, content_hash, size_bytes,
                   status, error, created_at, updated_at
            FROM document WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn list_for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, notebook_id, filename, content_type, content_hash, size_bytes,
                   status, error, created_at, updated_at
            FROM document
            WHERE notebook_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(notebook_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::row_to_document).collect()
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE document SET status = $2, error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }
        Ok(())
    }

    async fn load_blob(&self, id: Uuid) -> Result<Vec<u8>> {
        let row = sqlx::query("SELECT data FROM document_blob WHERE document_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Ok(row.get("data")),
            None => Err(Error::DocumentNotFound(id)),
        }
    }
}
