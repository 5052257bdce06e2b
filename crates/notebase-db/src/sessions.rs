//! Session repository implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use notebase_core::{
    Error, Result, Session, SessionRepository, SessionState, SessionTurn,
};

/// PostgreSQL implementation of SessionRepository.
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: Pool<Postgres>,
}

impl PgSessionRepository {
    /// Create a new PgSessionRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session> {
        let state: String = row.get("state");
        Ok(Session {
            id: row.get("id"),
            notebook_id: row.get("notebook_id"),
            user_id: row.get("user_id"),
            state: state.parse()?,
            created_at: row.get("created_at"),
            last_active_at: row.get("last_active_at"),
        })
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn get_or_create(
        &self,
        id: Uuid,
        notebook_id: Uuid,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<Session> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(
            r#"
            SELECT id, notebook_id, user_id, state, created_at, last_active_at
            FROM session WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let session = match row {
            Some(row) => {
                let mut session = Self::row_to_session(&row)?;

                // Session ids are caller-chosen; a collision with another
                // notebook or user must fail closed, not fork memory.
                if session.notebook_id != notebook_id || session.user_id != user_id {
                    return Err(Error::AccessDenied(format!(
                        "session {} belongs to a different notebook or user",
                        id
                    )));
                }

                let idle = Utc::now() - session.last_active_at;
                if session.state == SessionState::Active
                    && idle.num_seconds() >= ttl.as_secs() as i64
                {
                    sqlx::query("UPDATE session SET state = 'expired' WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(Error::Database)?;
                    session.state = SessionState::Expired;
                    debug!(
                        subsystem = "db",
                        component = "sessions",
                        session_id = %id,
                        idle_secs = idle.num_seconds(),
                        "Session expired on access"
                    );
                }
                session
            }
            None => {
                let now = Utc::now();
                sqlx::query(
                    r#"
                    INSERT INTO session (id, notebook_id, user_id, state, created_at, last_active_at)
                    VALUES ($1, $2, $3, 'active', $4, $4)
                    "#,
                )
                .bind(id)
                .bind(notebook_id)
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;

                Session {
                    id,
                    notebook_id,
                    user_id,
                    state: SessionState::Active,
                    created_at: now,
                    last_active_at: now,
                }
            }
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(session)
    }

    async fn recent_turns(&self, session_id: Uuid, limit: i64) -> Result<Vec<SessionTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, seq, query, answer, source_ids, created_at
            FROM (
                SELECT * FROM session_turn
                WHERE session_id = $1
                ORDER BY seq DESC
                LIMIT $2
            ) recent
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let source_ids: serde_json::Value = row.get("source_ids");
                let source_ids: Vec<Uuid> = serde_json::from_value(source_ids)?;
                Ok(SessionTurn {
                    id: row.get("id"),
                    session_id: row.get("session_id"),
                    seq: row.get("seq"),
                    query: row.get("query"),
                    answer: row.get("answer"),
                    source_ids,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn append_turn(
        &self,
        session_id: Uuid,
        query: &str,
        answer: &str,
        source_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(seq), -1) + 1 AS next_seq FROM session_turn WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let next_seq: i32 = row.get("next_seq");

        sqlx::query(
            r#"
            INSERT INTO session_turn (id, session_id, seq, query, answer, source_ids)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(session_id)
        .bind(next_seq)
        .bind(query)
        .bind(answer)
        .bind(serde_json::to_value(source_ids)?)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("UPDATE session SET last_active_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn expire_idle(&self, ttl: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE session SET state = 'expired'
            WHERE state = 'active'
              AND last_active_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(ttl.as_secs() as f64)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let expired = result.rows_affected();
        if expired > 0 {
            info!(
                subsystem = "db",
                component = "sessions",
                op = "expire_idle",
                expired,
                "Idle sessions expired"
            );
        }
        Ok(expired)
    }

    async fn purge_expired(&self, grace: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM session
            WHERE state = 'expired'
              AND last_active_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(grace.as_secs() as f64)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!(
                subsystem = "db",
                component = "sessions",
                op = "purge_expired",
                purged,
                "Expired sessions purged"
            );
        }
        Ok(purged)
    }
}
