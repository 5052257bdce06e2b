//! Per-session conversation memory.
//!
//! Reads a bounded history window before synthesis and appends the finished
//! turn afterward. Turns on the same session are strictly serialized through
//! a per-session async mutex so conversational ordering survives concurrent
//! clients; different sessions never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use notebase_core::config::SessionConfig;
use notebase_core::{Result, SessionRepository, SessionState, SessionTurn};

/// Registry of per-session locks.
///
/// Lock entries live for the process lifetime; sessions are bounded by the
/// GC job, and an idle entry is a few dozen bytes.
#[derive(Default)]
pub struct SessionLocks {
    inner: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding a session's turn ordering.
    pub fn lock_for(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("session lock registry poisoned");
        map.entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of tracked sessions (for tests and metrics).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("session lock registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// History window handed to the synthesizer.
#[derive(Debug, Clone, Default)]
pub struct MemoryWindow {
    /// Prior turns, oldest first. Empty for expired sessions.
    pub turns: Vec<SessionTurn>,
    /// True when the presented session had expired; the caller proceeds
    /// without memory and flags the response.
    pub expired: bool,
}

/// Session memory manager over a [`SessionRepository`].
pub struct SessionMemory {
    repo: Arc<dyn SessionRepository>,
    config: SessionConfig,
    locks: SessionLocks,
}

impl SessionMemory {
    /// Create a memory manager.
    pub fn new(repo: Arc<dyn SessionRepository>, config: SessionConfig) -> Self {
        Self {
            repo,
            config,
            locks: SessionLocks::new(),
        }
    }

    /// The lock serializing turns for one session.
    pub fn lock_for(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.lock_for(session_id)
    }

    /// Read the history window for a turn, creating the session on first use
    /// and applying idle expiry.
    pub async fn read(
        &self,
        session_id: Uuid,
        notebook_id: Uuid,
        user_id: Uuid,
        max_history: usize,
    ) -> Result<MemoryWindow> {
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let session = self
            .repo
            .get_or_create(session_id, notebook_id, user_id, ttl)
            .await?;

        if session.state == SessionState::Expired {
            debug!(
                subsystem = "retrieval",
                component = "memory",
                session_id = %session_id,
                "Session expired, proceeding without memory"
            );
            return Ok(MemoryWindow {
                turns: vec![],
                expired: true,
            });
        }

        let turns = self
            .repo
            .recent_turns(session_id, max_history as i64)
            .await?;

        debug!(
            subsystem = "retrieval",
            component = "memory",
            session_id = %session_id,
            result_count = turns.len(),
            "History window loaded"
        );
        Ok(MemoryWindow {
            turns,
            expired: false,
        })
    }

    /// Record a completed turn.
    pub async fn append(
        &self,
        session_id: Uuid,
        query: &str,
        answer: &str,
        source_ids: &[Uuid],
    ) -> Result<()> {
        self.repo
            .append_turn(session_id, query, answer, source_ids)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_for_returns_same_lock_per_session() {
        let locks = SessionLocks::new();
        let id = Uuid::new_v4();
        let a = locks.lock_for(id);
        let b = locks.lock_for(id);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn lock_for_distinct_sessions_are_independent() {
        let locks = SessionLocks::new();
        let a = locks.lock_for(Uuid::new_v4());
        let b = locks.lock_for(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn lock_serializes_critical_sections() {
        let locks = Arc::new(SessionLocks::new());
        let session_id = Uuid::new_v4();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let lock = locks.lock_for(session_id);
        let guard = lock.lock().await;

        let order_clone = order.clone();
        let lock_clone = locks.lock_for(session_id);
        let task = tokio::spawn(async move {
            let _g = lock_clone.lock().await;
            order_clone.lock().unwrap().push("second");
        });

        // Give the spawned task a chance to contend, then release.
        tokio::task::yield_now().await;
        order.lock().unwrap().push("first");
        drop(guard);

        task.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
