//! Summary node repository implementation.
//!
//! RAPTOR trees are versioned by `build_id`. A build is written in full while
//! invisible, then published by flipping `notebook.active_build`; the search
//! query joins on that pointer in a single statement, so concurrent queries
//! always see one complete tree and never a half-written one.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use notebase_core::{
    Candidate, Error, NewSummaryNode, Result, SourceKind, SummaryNodeRepository,
};

/// PostgreSQL implementation of SummaryNodeRepository.
#[derive(Clone)]
pub struct PgSummaryNodeRepository {
    pool: Pool<Postgres>,
}

impl PgSummaryNodeRepository {
    /// Create a new PgSummaryNodeRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SummaryNodeRepository for PgSummaryNodeRepository {
    async fn insert_build(
        &self,
        notebook_id: Uuid,
        build_id: Uuid,
        nodes: Vec<NewSummaryNode>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let node_count = nodes.len();
        for node in nodes {
            sqlx::query(
                r#"
                INSERT INTO summary_node
                    (id, notebook_id, build_id, level, parent_id, child_ids, child_chunk_ids, text, embedding)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(node.id)
            .bind(notebook_id)
            .bind(build_id)
            .bind(node.level)
            .bind(node.parent_id)
            .bind(&node.child_ids)
            .bind(&node.child_chunk_ids)
            .bind(&node.text)
            .bind(&node.embedding)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "raptor_nodes",
            notebook_id = %notebook_id,
            build_id = %build_id,
            node_count,
            "Summary build staged"
        );
        Ok(())
    }

    async fn activate_build(&self, notebook_id: Uuid, build_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let result = sqlx::query("UPDATE notebook SET active_build = $2 WHERE id = $1")
            .bind(notebook_id)
            .bind(build_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotebookNotFound(notebook_id));
        }

        // Prune superseded builds. In-flight queries are unaffected: they
        // read pointer and nodes in one statement.
        let pruned = sqlx::query(
            "DELETE FROM summary_node WHERE notebook_id = $1 AND build_id <> $2",
        )
        .bind(notebook_id)
        .bind(build_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "raptor_nodes",
            notebook_id = %notebook_id,
            build_id = %build_id,
            pruned = pruned.rows_affected(),
            "Summary build activated"
        );
        Ok(())
    }

    async fn find_similar(
        &self,
        notebook_id: Uuid,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.notebook_id, s.level, s.text,
                   1.0 - (s.embedding <=> $2) AS score
            FROM summary_node s
            JOIN notebook n ON n.id = s.notebook_id AND s.build_id = n.active_build
            WHERE s.notebook_id = $1
            ORDER BY s.embedding <=> $2, s.id
            LIMIT $3
            "#,
        )
        .bind(notebook_id)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Retrieval(format!("summary search failed: {}", e)))?;

        let candidates: Vec<Candidate> = rows
            .into_iter()
            .map(|row| Candidate {
                id: row.get("id"),
                notebook_id: row.get("notebook_id"),
                document_id: None,
                filename: None,
                kind: SourceKind::Summary,
                level: row.get("level"),
                seq: 0,
                text: row.get("text"),
                score: row.get::<f64, _>("score") as f32,
            })
            .collect();

        debug!(
            subsystem = "db",
            component = "raptor_nodes",
            op = "find_similar",
            notebook_id = %notebook_id,
            result_count = candidates.len(),
            "Summary vector search complete"
        );
        Ok(candidates)
    }

    async fn node_count(&self, notebook_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM summary_node s
            JOIN notebook n ON n.id = s.notebook_id AND s.build_id = n.active_build
            WHERE s.notebook_id = $1
            "#,
        )
        .bind(notebook_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("count"))
    }
}
