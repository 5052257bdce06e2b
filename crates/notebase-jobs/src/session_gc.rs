//! Session expiry and garbage collection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use notebase_core::config::SessionConfig;
use notebase_core::{JobType, SessionRepository};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Handler for `session_gc` jobs: expires idle sessions and purges expired
/// sessions past their grace period.
pub struct SessionGcHandler {
    sessions: Arc<dyn SessionRepository>,
    config: SessionConfig,
}

impl SessionGcHandler {
    pub fn new(sessions: Arc<dyn SessionRepository>, config: SessionConfig) -> Self {
        Self { sessions, config }
    }
}

#[async_trait]
impl JobHandler for SessionGcHandler {
    fn job_type(&self) -> JobType {
        JobType::SessionGc
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let grace = Duration::from_secs(self.config.grace_secs);

        let expired = match self.sessions.expire_idle(ttl).await {
            Ok(n) => n,
            Err(e) => return JobResult::Retry(format!("expiry sweep failed: {}", e)),
        };

        let purged = match self.sessions.purge_expired(grace).await {
            Ok(n) => n,
            Err(e) => return JobResult::Retry(format!("purge sweep failed: {}", e)),
        };

        if expired > 0 || purged > 0 {
            info!(
                subsystem = "jobs",
                component = "session_gc",
                expired,
                purged,
                "Session GC sweep complete"
            );
        }
        JobResult::Success
    }
}
