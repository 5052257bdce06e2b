//! Background job queue repository implementation.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so multiple workers never double-run a
//! job. Retries are scheduled by pushing `next_run_at` into the future.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use notebase_core::{Error, Job, JobRepository, JobType, QueueStats, Result};

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            job_type: job_type.parse()?,
            notebook_id: row.get("notebook_id"),
            document_id: row.get("document_id"),
            status: status.parse()?,
            priority: row.get("priority"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            next_run_at: row.get("next_run_at"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

const JOB_COLUMNS: &str = "id, job_type, notebook_id, document_id, status, priority, \
     retry_count, max_retries, next_run_at, error, created_at, started_at, completed_at";

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn queue(
        &self,
        job_type: JobType,
        notebook_id: Option<Uuid>,
        document_id: Option<Uuid>,
        priority: i32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO job (id, job_type, notebook_id, document_id, priority, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(job_type.to_string())
        .bind(notebook_id)
        .bind(document_id)
        .bind(priority)
        .bind(notebase_core::defaults::JOB_MAX_RETRIES)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "jobs",
            job_id = %id,
            job_type = %job_type,
            "Job queued"
        );
        Ok(id)
    }

    async fn queue_deduplicated(
        &self,
        job_type: JobType,
        notebook_id: Option<Uuid>,
        document_id: Option<Uuid>,
        priority: i32,
    ) -> Result<Option<Uuid>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM job
            WHERE job_type = $1
              AND notebook_id IS NOT DISTINCT FROM $2
              AND document_id IS NOT DISTINCT FROM $3
              AND status = 'pending'
            LIMIT 1
            "#,
        )
        .bind(job_type.to_string())
        .bind(notebook_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if row.is_some() {
            debug!(
                subsystem = "db",
                component = "jobs",
                job_type = %job_type,
                "Job deduplicated (identical pending job exists)"
            );
            return Ok(None);
        }

        self.queue(job_type, notebook_id, document_id, priority)
            .await
            .map(Some)
    }

    async fn claim_next(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let type_names: Vec<String> = job_types.iter().map(|t| t.to_string()).collect();

        let sql = format!(
            r#"
            UPDATE job SET status = 'running', started_at = now()
            WHERE id = (
                SELECT id FROM job
                WHERE status = 'pending'
                  AND next_run_at <= now()
                  AND ($1 OR job_type = ANY($2))
                ORDER BY priority ASC, next_run_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(type_names.is_empty())
            .bind(&type_names)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE job SET status = 'completed', completed_at = now(), error = NULL WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE job SET status = 'failed', completed_at = now(), error = $2 WHERE id = $1",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn retry_later(&self, job_id: Uuid, error: &str, delay: Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job SET status = 'pending',
                           retry_count = retry_count + 1,
                           error = $2,
                           next_run_at = now() + make_interval(secs => $3)
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(delay.as_secs() as f64)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM job WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("count"))
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM job GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match status.as_str() {
                "pending" => stats.pending = count,
                "running" => stats.running = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}
