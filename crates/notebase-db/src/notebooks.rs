//! Notebook repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use notebase_core::{
    AccessLevel, Error, Notebook, NotebookRepository, NotebookSummary, Result,
};

/// PostgreSQL implementation of NotebookRepository.
#[derive(Clone)]
pub struct PgNotebookRepository {
    pool: Pool<Postgres>,
}

impl PgNotebookRepository {
    /// Create a new PgNotebookRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_notebook(row: &sqlx::postgres::PgRow) -> Notebook {
        Notebook {
            id: row.get("id"),
            name: row.get("name"),
            owner_id: row.get("owner_id"),
            active_build: row.get("active_build"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl NotebookRepository for PgNotebookRepository {
    async fn create(&self, name: &str, owner_id: Uuid) -> Result<Uuid> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("notebook name must not be empty".to_string()));
        }

        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("INSERT INTO notebook (id, name, owner_id) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(name.trim())
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO notebook_access (notebook_id, user_id, level) VALUES ($1, $2, 'owner')",
        )
        .bind(id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "notebooks",
            notebook_id = %id,
            "Notebook created"
        );
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notebook>> {
        let row = sqlx::query(
            "SELECT id, name, owner_id, active_build, created_at FROM notebook WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::row_to_notebook))
    }

    async fn list_visible(&self, user_id: Uuid) -> Result<Vec<NotebookSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT n.id, n.name, n.created_at,
                   (SELECT COUNT(*) FROM document d WHERE d.notebook_id = n.id) AS document_count
            FROM notebook n
            JOIN notebook_access a ON a.notebook_id = n.id
            WHERE a.user_id = $1
            ORDER BY n.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| NotebookSummary {
                id: row.get("id"),
                name: row.get("name"),
                document_count: row.get("document_count"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM notebook WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotebookNotFound(id));
        }

        info!(
            subsystem = "db",
            component = "notebooks",
            notebook_id = %id,
            "Notebook deleted (cascade)"
        );
        Ok(())
    }

    async fn set_access(
        &self,
        notebook_id: Uuid,
        user_id: Uuid,
        level: Option<AccessLevel>,
    ) -> Result<()> {
        match level {
            Some(level) => {
                sqlx::query(
                    r#"
                    INSERT INTO notebook_access (notebook_id, user_id, level)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (notebook_id, user_id) DO UPDATE SET level = EXCLUDED.level
                    "#,
                )
                .bind(notebook_id)
                .bind(user_id)
                .bind(level.to_string())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM notebook_access WHERE notebook_id = $1 AND user_id = $2",
                )
                .bind(notebook_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            }
        }
        Ok(())
    }

    async fn access_level(&self, notebook_id: Uuid, user_id: Uuid) -> Result<Option<AccessLevel>> {
        let row = sqlx::query(
            "SELECT level FROM notebook_access WHERE notebook_id = $1 AND user_id = $2",
        )
        .bind(notebook_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let level: String = row.get("level");
                Ok(Some(level.parse()?))
            }
            None => Ok(None),
        }
    }

    async fn set_active_build(&self, notebook_id: Uuid, build_id: Option<Uuid>) -> Result<()> {
        let result = sqlx::query("UPDATE notebook SET active_build = $2 WHERE id = $1")
            .bind(notebook_id)
            .bind(build_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotebookNotFound(notebook_id));
        }
        Ok(())
    }
}
