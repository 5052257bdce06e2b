//! Job worker: claims queued jobs and runs them with bounded concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use notebase_core::{defaults, Job, JobRepository, JobType};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
        }
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A job failed.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// A job was returned to the queue for retry.
    JobRetried { job_id: Uuid, job_type: JobType },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> notebase_core::Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| notebase_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            jobs,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(?job_type, "Registered job handler");
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);

        tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop with concurrent job processing.
    ///
    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue is empty.
    async fn run(self: &Arc<Self>, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Job worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = Arc::clone(self);
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                // Queue empty — sleep before polling again
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
                // No sleep — immediately try to claim more jobs
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Claim the next available job without processing it.
    async fn claim_job(&self) -> Option<Job> {
        let job_types: Vec<JobType> = {
            let handlers = self.handlers.read().await;
            handlers.keys().copied().collect()
        };
        if job_types.is_empty() {
            return None;
        }

        match self.jobs.claim_next(&job_types).await {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(e) => {
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }

    /// Execute one claimed job and record the outcome.
    async fn execute_job(&self, job: Job) {
        let job_id = job.id;
        let job_type = job.job_type;
        let retry_count = job.retry_count;

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };
        let Some(handler) = handler else {
            warn!(job_id = %job_id, ?job_type, "No handler for claimed job type");
            let _ = self.jobs.fail(job_id, "no handler registered").await;
            return;
        };

        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            job_type = %job_type,
            retry_count,
            "Job started"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id, job_type });

        match handler.execute(JobContext::new(job)).await {
            JobResult::Success => {
                if let Err(e) = self.jobs.complete(job_id).await {
                    error!(job_id = %job_id, error = ?e, "Failed to mark job completed");
                }
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Failed(message) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = %job_type,
                    error = %message,
                    "Job failed permanently"
                );
                if let Err(e) = self.jobs.fail(job_id, &message).await {
                    error!(job_id = %job_id, error = ?e, "Failed to mark job failed");
                }
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error: message,
                });
            }
            JobResult::Retry(message) => {
                let delay = retry_backoff(retry_count);
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = %job_type,
                    retry_count,
                    delay_secs = delay.as_secs(),
                    error = %message,
                    "Job scheduled for retry"
                );
                if let Err(e) = self.jobs.retry_later(job_id, &message, delay).await {
                    error!(job_id = %job_id, error = ?e, "Failed to schedule job retry");
                }
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobRetried { job_id, job_type });
            }
        }
    }
}

/// Exponential backoff for the nth retry.
pub fn retry_backoff(retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(0, 10) as u32;
    Duration::from_secs(defaults::JOB_RETRY_BASE_SECS * 2u64.pow(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoOpHandler;
    use async_trait::async_trait;
    use notebase_core::{QueueStats, Result};
    use std::sync::Mutex;

    #[test]
    fn backoff_doubles_per_retry() {
        assert_eq!(retry_backoff(0), Duration::from_secs(5));
        assert_eq!(retry_backoff(1), Duration::from_secs(10));
        assert_eq!(retry_backoff(2), Duration::from_secs(20));
        // Clamped exponent keeps the delay finite
        assert_eq!(retry_backoff(100), Duration::from_secs(5 * 1024));
    }

    /// In-memory job queue driving the worker loop.
    #[derive(Default)]
    struct MemJobs {
        queue: Mutex<Vec<Job>>,
        completed: Mutex<Vec<Uuid>>,
        failed: Mutex<Vec<(Uuid, String)>>,
        retried: Mutex<Vec<(Uuid, String)>>,
    }

    fn pending_job(job_type: JobType) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type,
            notebook_id: None,
            document_id: None,
            status: notebase_core::JobStatus::Pending,
            priority: 5,
            retry_count: 0,
            max_retries: 3,
            next_run_at: chrono::Utc::now(),
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[async_trait]
    impl JobRepository for MemJobs {
        async fn queue(
            &self,
            job_type: JobType,
            _notebook_id: Option<Uuid>,
            _document_id: Option<Uuid>,
            _priority: i32,
        ) -> Result<Uuid> {
            let job = pending_job(job_type);
            let id = job.id;
            self.queue.lock().unwrap().push(job);
            Ok(id)
        }
        async fn queue_deduplicated(
            &self,
            job_type: JobType,
            notebook_id: Option<Uuid>,
            document_id: Option<Uuid>,
            priority: i32,
        ) -> Result<Option<Uuid>> {
            self.queue(job_type, notebook_id, document_id, priority)
                .await
                .map(Some)
        }
        async fn claim_next(&self, job_types: &[JobType]) -> Result<Option<Job>> {
            let mut queue = self.queue.lock().unwrap();
            let pos = queue
                .iter()
                .position(|j| job_types.is_empty() || job_types.contains(&j.job_type));
            Ok(pos.map(|p| queue.remove(p)))
        }
        async fn complete(&self, job_id: Uuid) -> Result<()> {
            self.completed.lock().unwrap().push(job_id);
            Ok(())
        }
        async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
            self.failed.lock().unwrap().push((job_id, error.to_string()));
            Ok(())
        }
        async fn retry_later(&self, job_id: Uuid, error: &str, _delay: Duration) -> Result<()> {
            self.retried.lock().unwrap().push((job_id, error.to_string()));
            Ok(())
        }
        async fn pending_count(&self) -> Result<i64> {
            Ok(self.queue.lock().unwrap().len() as i64)
        }
        async fn stats(&self) -> Result<QueueStats> {
            Ok(QueueStats::default())
        }
    }

    #[tokio::test]
    async fn worker_processes_queued_job_and_shuts_down() {
        let jobs = Arc::new(MemJobs::default());
        let job_id = jobs.queue(JobType::SessionGc, None, None, 8).await.unwrap();

        let worker = JobWorker::new(
            jobs.clone(),
            WorkerConfig {
                poll_interval_ms: 10,
                max_concurrent_jobs: 2,
                enabled: true,
            },
        );
        worker.register_handler(NoOpHandler::new(JobType::SessionGc)).await;

        let handle = worker.start();

        // Poll the queue state rather than racing the event stream
        let mut completed = false;
        for _ in 0..200 {
            if !jobs.completed.lock().unwrap().is_empty() {
                completed = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(completed, "job never completed");
        assert_eq!(jobs.completed.lock().unwrap().as_slice(), &[job_id]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn worker_routes_failures_and_retries() {
        struct FailingHandler;
        #[async_trait]
        impl JobHandler for FailingHandler {
            fn job_type(&self) -> JobType {
                JobType::Ingest
            }
            async fn execute(&self, ctx: JobContext) -> JobResult {
                if ctx.job.retry_count == 0 {
                    JobResult::Retry("transient".to_string())
                } else {
                    JobResult::Failed("permanent".to_string())
                }
            }
        }

        let jobs = Arc::new(MemJobs::default());
        let retry_id = jobs.queue(JobType::Ingest, None, None, 3).await.unwrap();

        let worker = JobWorker::new(
            jobs.clone(),
            WorkerConfig {
                poll_interval_ms: 10,
                max_concurrent_jobs: 1,
                enabled: true,
            },
        );
        worker.register_handler(FailingHandler).await;
        let handle = worker.start();

        let mut retried = false;
        for _ in 0..200 {
            if !jobs.retried.lock().unwrap().is_empty() {
                retried = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(retried, "retry never observed");
        assert_eq!(jobs.retried.lock().unwrap()[0].0, retry_id);

        handle.shutdown().await.unwrap();
    }
}
