//! Background worker that drains the ingestion job queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use tessera_core::{defaults, Error, IngestionJob, JobRepository, JobType, Result};

use crate::pipeline::{IngestionPipeline, PipelineOutcome};

/// Configuration for the ingest worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// How often terminal-job retention cleanup runs, in seconds.
    pub cleanup_interval_secs: u64,
    /// Days a terminal job is kept before cleanup deletes it.
    pub retention_days: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            cleanup_interval_secs: defaults::JOB_CLEANUP_INTERVAL_SECS,
            retention_days: defaults::JOB_RETENTION_DAYS,
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
    /// | `JOB_RETENTION_DAYS` | `7` | Terminal-job retention window |
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

        let retention_days = std::env::var("JOB_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_RETENTION_DAYS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            cleanup_interval_secs: defaults::JOB_CLEANUP_INTERVAL_SECS,
            retention_days,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the ingest worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and started.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A job failed transiently and was rescheduled.
    JobRetried {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// A job failed terminally.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
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
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that claims due jobs and runs them through the pipeline.
pub struct IngestWorker {
    jobs: Arc<dyn JobRepository>,
    pipeline: Arc<IngestionPipeline>,
    config: WorkerConfig,
    /// Job types this worker claims; empty means all.
    job_types: Vec<JobType>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl IngestWorker {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        pipeline: Arc<IngestionPipeline>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            pipeline,
            config,
            job_types: Vec::new(),
            event_tx,
        }
    }

    /// Restrict the worker to specific job types.
    pub fn with_job_types(mut self, job_types: Vec<JobType>) -> Self {
        self.job_types = job_types;
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claim one batch of due jobs and process them concurrently.
    ///
    /// Returns the number of jobs claimed. Exposed so tests and embedded
    /// callers can drive the worker without the polling loop.
    pub async fn tick(&self) -> usize {
        let batch = match self
            .jobs
            .get_next_jobs(self.config.max_concurrent_jobs as i64, &self.job_types)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    subsystem = "worker",
                    op = "tick",
                    error = %e,
                    "Failed to claim jobs"
                );
                return 0;
            }
        };

        if batch.is_empty() {
            return 0;
        }

        let mut tasks = tokio::task::JoinSet::new();
        let mut claimed = 0;

        for job in batch {
            let job = match self.claim(job).await {
                Some(job) => job,
                None => continue,
            };
            claimed += 1;

            let worker = self.clone_refs();
            tasks.spawn(async move {
                worker.execute_job(job).await;
            });
        }

        debug!(
            subsystem = "worker",
            op = "tick",
            claimed,
            "Processing concurrent job batch"
        );
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(subsystem = "worker", error = ?e, "Job task panicked");
            }
        }

        claimed
    }

    /// Transition a due job to started and refresh its row.
    async fn claim(&self, job: IngestionJob) -> Option<IngestionJob> {
        if let Err(e) = self.jobs.mark_as_started(job.id).await {
            // Another worker may have taken it, or it was cancelled.
            warn!(
                subsystem = "worker",
                job_id = %job.id,
                error = %e,
                "Failed to claim job, skipping"
            );
            return None;
        }
        match self.jobs.get(job.id).await {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(e) => {
                error!(
                    subsystem = "worker",
                    job_id = %job.id,
                    error = %e,
                    "Failed to reload claimed job"
                );
                None
            }
        }
    }

    fn clone_refs(&self) -> WorkerRef {
        WorkerRef {
            pipeline: self.pipeline.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "worker", "Ingest worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "worker",
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Ingest worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval_secs);
        let mut last_cleanup = Instant::now();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "worker", "Ingest worker received shutdown signal");
                break;
            }

            if last_cleanup.elapsed() >= cleanup_interval {
                last_cleanup = Instant::now();
                match self.jobs.cleanup_old_jobs(self.config.retention_days).await {
                    Ok(deleted) if deleted > 0 => {
                        info!(
                            subsystem = "worker",
                            op = "cleanup",
                            deleted,
                            retention_days = self.config.retention_days,
                            "Deleted old terminal jobs"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(subsystem = "worker", error = %e, "Job cleanup failed");
                    }
                }
            }

            let claimed = self.tick().await;
            if claimed == 0 {
                // Queue empty, sleep before polling again.
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(subsystem = "worker", "Ingest worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "worker", "Ingest worker stopped");
    }
}

/// Reference bundle for executing one job in a spawned task.
struct WorkerRef {
    pipeline: Arc<IngestionPipeline>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerRef {
    async fn execute_job(self, job: IngestionJob) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;

        info!(
            subsystem = "worker",
            op = "execute",
            job_id = %job_id,
            ?job_type,
            attempt = job.attempts,
            "Processing job"
        );
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, job_type });

        match self.pipeline.process_job(&job).await {
            Ok(PipelineOutcome::Completed { .. }) => {
                info!(
                    subsystem = "worker",
                    op = "execute",
                    job_id = %job_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            Ok(PipelineOutcome::Retried { error }) => {
                let _ = self.event_tx.send(WorkerEvent::JobRetried {
                    job_id,
                    job_type,
                    error,
                });
            }
            Ok(PipelineOutcome::Failed { error }) => {
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error,
                });
            }
            Err(e) => {
                // Bookkeeping failure; the job row may be stuck until the
                // next poll retries or an operator intervenes.
                error!(
                    subsystem = "worker",
                    job_id = %job_id,
                    error = %e,
                    "Failed to record job outcome"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tessera_db::{
        MemoryChunkRepository, MemoryEmbeddingRepository, MemoryJobRepository,
        MemoryObjectRepository, MemoryVectorIndex,
    };

    use crate::splitter::ParagraphSplitter;
    use tessera_core::{CreateJobRequest, JobStatus};

    fn build_worker() -> (Arc<MemoryJobRepository>, Arc<MemoryObjectRepository>, IngestWorker) {
        let jobs = Arc::new(MemoryJobRepository::new());
        let objects = Arc::new(MemoryObjectRepository::new());
        let pipeline = Arc::new(IngestionPipeline::new(
            jobs.clone(),
            objects.clone(),
            Arc::new(MemoryChunkRepository::new()),
            Arc::new(MemoryEmbeddingRepository::new()),
            Arc::new(MemoryVectorIndex::new()),
            Arc::new(ParagraphSplitter::with_sizes(60, 5)),
        ));
        let config = WorkerConfig::default().with_poll_interval(10);
        let worker = IngestWorker::new(jobs.clone(), pipeline, config);
        (jobs, objects, worker)
    }

    async fn queue_job(
        jobs: &MemoryJobRepository,
        objects: &MemoryObjectRepository,
    ) -> Uuid {
        let object_id =
            objects.insert_parsed(JobType::TextSnippet, "alpha text\n\nbeta text\n\ngamma text");
        let mut req = CreateJobRequest::new(JobType::TextSnippet, "inline:test");
        req.related_object_id = Some(object_id);
        jobs.create(req).await.unwrap().id
    }

    #[tokio::test]
    async fn test_tick_processes_batch_to_completion() {
        let (jobs, objects, worker) = build_worker();
        let a = queue_job(&jobs, &objects).await;
        let b = queue_job(&jobs, &objects).await;

        let claimed = worker.tick().await;
        assert_eq!(claimed, 2);

        for id in [a, b] {
            let job = jobs.get(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.attempts, 1);
        }

        // Queue drained; next tick claims nothing.
        assert_eq!(worker.tick().await, 0);
    }

    #[tokio::test]
    async fn test_tick_emits_lifecycle_events() {
        let (jobs, objects, worker) = build_worker();
        let job_id = queue_job(&jobs, &objects).await;
        let mut events = worker.events();

        worker.tick().await;

        let mut started = false;
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                WorkerEvent::JobStarted { job_id: id, .. } if id == job_id => started = true,
                WorkerEvent::JobCompleted { job_id: id, .. } if id == job_id => completed = true,
                _ => {}
            }
        }
        assert!(started);
        assert!(completed);
    }

    #[tokio::test]
    async fn test_tick_respects_job_type_filter() {
        let (jobs, objects, worker) = build_worker();
        let worker = worker.with_job_types(vec![JobType::Pdf]);
        queue_job(&jobs, &objects).await;

        assert_eq!(worker.tick().await, 0);
    }

    #[tokio::test]
    async fn test_worker_shuts_down_gracefully() {
        let (_jobs, _objects, worker) = build_worker();
        let handle = worker.start();
        let mut events = handle.events();

        handle.shutdown().await.unwrap();

        let deadline = Duration::from_secs(2);
        let stopped = tokio::time::timeout(deadline, async {
            loop {
                match events.recv().await {
                    Ok(WorkerEvent::WorkerStopped) => break true,
                    Ok(_) => continue,
                    Err(_) => break false,
                }
            }
        })
        .await
        .unwrap_or(false);
        assert!(stopped);
    }

    #[test]
    fn test_config_from_env_defaults() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_concurrent_jobs, defaults::JOB_MAX_CONCURRENT);
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
        assert_eq!(config.retention_days, defaults::JOB_RETENTION_DAYS);
    }
}
