//! Job handler trait and execution context.

use async_trait::async_trait;
use uuid::Uuid;

use notebase_core::{Job, JobType};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// The notebook this job targets, if any.
    pub fn notebook_id(&self) -> Option<Uuid> {
        self.job.notebook_id
    }

    /// The document this job targets, if any.
    pub fn document_id(&self) -> Option<Uuid> {
        self.job.document_id
    }

    /// True when this attempt is the job's last before permanent failure.
    pub fn is_final_attempt(&self) -> bool {
        self.job.retry_count + 1 >= self.job.max_retries
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully.
    Success,
    /// Job failed permanently.
    Failed(String),
    /// Job should be retried after backoff.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success
    }
}
