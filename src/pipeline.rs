use crate::config::Config;
use crate::dlq::DeadLetterLog;
use crate::error::{classify_io_error, PipelineError};
use crate::events::EventPublisher;
use crate::observability::{metrics::Metrics, Logger};
use crate::protocol::{DeadLetter, Project, ProjectStatus};
use crate::storage::UploadStorage;
use crate::store::{ProjectStore, StoreError};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

const DEDUP_CAPACITY: usize = 4096;

/// Offsets from job start at which each status transition happens.
#[derive(Debug, Clone, Copy)]
pub struct StageSchedule {
    pub processing_at: Duration,
    pub rendering_at: Duration,
    pub done_at: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(Duration::from_secs(30), self.base.saturating_mul(factor))
    }
}

#[derive(Clone)]
pub struct Pipeline {
    pub store: ProjectStore,
    pub storage: UploadStorage,
    pub schedule: StageSchedule,
    pub retry: RetryPolicy,
    pub job_timeout: Duration,
    pub logger: Logger,
    pub metrics: Arc<Metrics>,
    pub events: EventPublisher,
    pub dead_letters: DeadLetterLog,
}

impl Pipeline {
    pub fn from_config(
        config: &Config,
        store: ProjectStore,
        storage: UploadStorage,
        logger: Logger,
        metrics: Arc<Metrics>,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            storage,
            schedule: StageSchedule {
                processing_at: Duration::from_millis(config.processing_at_ms),
                rendering_at: Duration::from_millis(config.rendering_at_ms),
                done_at: Duration::from_millis(config.done_at_ms),
            },
            retry: RetryPolicy {
                max_retries: config.stage_max_retries,
                base: Duration::from_millis(config.stage_retry_base_ms),
            },
            job_timeout: Duration::from_millis(config.job_timeout_ms),
            logger,
            metrics,
            events,
            dead_letters: DeadLetterLog::new(config.dlq_path.clone(), config.dlq_max_bytes, config.dlq_max_rotations),
        }
    }

    pub async fn run_job(&self, id: Uuid) {
        let started = Instant::now();
        self.metrics.jobs_in_progress.inc();

        match tokio::time::timeout(self.job_timeout, self.drive(id, started)).await {
            Ok(Ok(())) => {
                self.metrics.jobs_completed.inc();
                self.logger.info("Project done", Some(&json!({
                    "project_id": id.to_string(),
                    "elapsed_ms": started.elapsed().as_millis() as u64
                })));
            }
            Ok(Err(PipelineError::Missing)) => {
                self.logger.info("Project record vanished, job abandoned", Some(&json!({
                    "project_id": id.to_string()
                })));
            }
            Ok(Err(e)) => self.fail(id, "STAGE_FAILED", &e).await,
            Err(_) => {
                self.metrics.jobs_timeout.inc();
                let e = PipelineError::permanent(format!(
                    "job timed out after {} ms",
                    self.job_timeout.as_millis()
                ));
                self.fail(id, "TIMEOUT", &e).await;
            }
        }

        self.metrics.job_duration_seconds.observe(started.elapsed().as_secs_f64());
        self.metrics.jobs_in_progress.dec();
    }

    async fn drive(&self, id: Uuid, started: Instant) -> Result<(), PipelineError> {
        sleep_until(started + self.schedule.processing_at).await;
        let project = self.transition(&id, ProjectStatus::Processing).await?;
        let size = self
            .with_retries(&id, "inspect", || self.storage.inspect(&project.path))
            .await?;
        self.logger.info("Upload inspected", Some(&json!({
            "project_id": id.to_string(),
            "size_bytes": size
        })));

        sleep_until(started + self.schedule.rendering_at).await;
        self.transition(&id, ProjectStatus::Rendering).await?;
        let (_, output_url) = self
            .with_retries(&id, "render", || self.storage.render_output(&project.path))
            .await?;

        sleep_until(started + self.schedule.done_at).await;
        let done = self.store.complete(&id, output_url).await.map_err(from_store_error)?;
        self.events.project_changed(&done).await;
        Ok(())
    }

    async fn transition(&self, id: &Uuid, next: ProjectStatus) -> Result<Project, PipelineError> {
        let project = self.store.advance(id, next).await.map_err(from_store_error)?;
        self.logger.info("Project status changed", Some(&json!({
            "project_id": id.to_string(),
            "status": next.as_str()
        })));
        self.events.project_changed(&project).await;
        Ok(project)
    }

    async fn with_retries<T, F, Fut>(&self, id: &Uuid, stage: &str, op: F) -> Result<T, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut attempt = 0_u32;
        loop {
            let e = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => classify_io_error(stage, &e),
            };
            if !e.is_transient() || attempt >= self.retry.max_retries {
                return Err(e);
            }
            attempt += 1;
            let backoff = self.retry.backoff(attempt);
            self.metrics.stage_retries_total.inc();
            self.logger.warn("Stage transient error, retrying", Some(&json!({
                "project_id": id.to_string(),
                "stage": stage,
                "attempt": attempt,
                "error": e.message(),
                "backoff_ms": backoff.as_millis() as u64
            })));
            sleep(backoff).await;
        }
    }

    async fn fail(&self, id: Uuid, reason: &str, cause: &PipelineError) {
        let last_status = match self.store.get(&id).await {
            Some(p) => p.status,
            None => return,
        };
        let project = match self.store.fail(&id, cause.message().to_string()).await {
            Ok(p) => p,
            Err(e) => {
                self.logger.warn("Could not mark project failed", Some(&json!({
                    "project_id": id.to_string(),
                    "error": e.to_string()
                })));
                return;
            }
        };

        self.metrics.jobs_failed.inc();
        self.logger.error("Project failed", Some(&json!({
            "project_id": id.to_string(),
            "reason": reason,
            "last_status": last_status.as_str(),
            "error": cause.message()
        })));
        self.events.project_changed(&project).await;

        let letter = DeadLetter {
            reason: reason.to_string(),
            project_id: id,
            filename: project.filename.clone(),
            last_status,
            error: cause.message().to_string(),
            ts: Utc::now().to_rfc3339(),
        };
        let log = self.dead_letters.clone();
        let entry = letter.clone();
        let written = tokio::task::spawn_blocking(move || log.record(&entry))
            .await
            .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
        match written {
            Ok(()) => self.metrics.dlq_written_total.inc(),
            Err(e) => {
                self.logger.error("Failed to write dead letter", Some(&json!({
                    "project_id": id.to_string(),
                    "path": self.dead_letters.path().display().to_string(),
                    "error": e.to_string()
                })));
            }
        }
        self.events.dead_letter(&letter).await;
    }
}

fn from_store_error(e: StoreError) -> PipelineError {
    match e {
        StoreError::NotFound(_) => PipelineError::Missing,
        other => PipelineError::permanent(other.to_string()),
    }
}

/// Enqueue side of the pipeline, held by the HTTP layer.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Uuid>,
    metrics: Arc<Metrics>,
}

impl PipelineHandle {
    pub(crate) fn new(tx: mpsc::Sender<Uuid>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    pub fn enqueue(&self, id: Uuid) -> Result<(), PipelineError> {
        match self.tx.try_send(id) {
            Ok(()) => {
                self.metrics.jobs_queued.inc();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(PipelineError::transient("processing queue is full")),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::permanent("pipeline is not running")),
        }
    }
}

/// Starts the dispatcher. The returned task finishes once shutdown is signalled and every
/// in-flight job has completed.
pub fn spawn(
    pipeline: Pipeline,
    max_concurrency: usize,
    queue_capacity: usize,
    shutdown: broadcast::Receiver<()>,
) -> (PipelineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let handle = PipelineHandle::new(tx, pipeline.metrics.clone());
    let task = tokio::spawn(dispatch(pipeline, rx, max_concurrency, shutdown));
    (handle, task)
}

async fn dispatch(
    pipeline: Pipeline,
    mut rx: mpsc::Receiver<Uuid>,
    max_concurrency: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let mut dedup = Dedup::new(DEDUP_CAPACITY);
    let mut interrupted: Option<Uuid> = None;

    loop {
        let id = tokio::select! {
            _ = shutdown.recv() => break,
            next = rx.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };
        pipeline.metrics.jobs_queued.dec();

        if dedup.contains(&id) {
            pipeline.logger.info("Duplicate job detected, skipping", Some(&json!({
                "project_id": id.to_string()
            })));
            continue;
        }
        dedup.insert(id);

        // Backpressure: wait for a free worker rather than dropping the job
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                pipeline.logger.warn("Backpressure: concurrency limit reached", Some(&json!({
                    "project_id": id.to_string(),
                    "max_concurrency": max_concurrency
                })));
                tokio::select! {
                    _ = shutdown.recv() => {
                        interrupted = Some(id);
                        break;
                    }
                    acquired = semaphore.clone().acquire_owned() => match acquired {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                }
            }
        };

        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline.run_job(id).await;
            drop(permit);
        });
    }

    pipeline.logger.info("Pipeline draining", None);
    rx.close();
    let shutdown_error = PipelineError::permanent("service shut down before processing started");
    if let Some(id) = interrupted {
        pipeline.fail(id, "SHUTDOWN", &shutdown_error).await;
    }
    while let Ok(id) = rx.try_recv() {
        pipeline.metrics.jobs_queued.dec();
        pipeline.fail(id, "SHUTDOWN", &shutdown_error).await;
    }

    let _ = semaphore.acquire_many(max_concurrency as u32).await;
    pipeline.logger.info("Pipeline stopped", None);
}

/// Bounded set of recently dispatched ids.
struct Dedup {
    set: HashSet<Uuid>,
    queue: VecDeque<Uuid>,
    capacity: usize,
}

impl Dedup {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            queue: VecDeque::new(),
            capacity,
        }
    }
    fn insert(&mut self, key: Uuid) {
        if self.set.insert(key) {
            self.queue.push_back(key);
            if self.queue.len() > self.capacity {
                if let Some(old) = self.queue.pop_front() {
                    self.set.remove(&old);
                }
            }
        }
    }
    fn contains(&self, key: &Uuid) -> bool {
        self.set.contains(key)
    }
}
