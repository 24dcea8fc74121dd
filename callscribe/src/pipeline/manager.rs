//! Queue manager.
//!
//! Owns the job collection and the only path into the worker pool. Drain passes are mutually
//! exclusive, and a single dispatcher task turns bursts of enqueue signals into one pass.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::PipelineEvent;
use super::executor::{ExecutionOutcome, ExecutorConfig, PipelineExecutor};
use super::factory::JobFactory;
use super::job::{AssetDescriptor, DEFAULT_MAX_RETRIES, Job, JobStatus};
use super::retry::RetryPolicy;
use super::stats::{DEFAULT_THROUGHPUT_WINDOW_MINUTES, ProcessingStats, QueueStats, StatsCalculator};
use super::store::{JobStore, PipelineSnapshot};
use super::worker_pool::{WorkItem, WorkerPool, WorkerPoolConfig};
use crate::notification::{Notification, NotificationSink};
use crate::services::PipelineServices;
use crate::{Error, Result};

/// Configuration for the queue manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueManagerConfig {
    /// Quiet period after the last enqueue before a drain starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Automatic requeues allowed per job.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Window for `current_throughput`.
    #[serde(default = "default_throughput_window_minutes")]
    pub throughput_window_minutes: i64,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_throughput_window_minutes() -> i64 {
    DEFAULT_THROUGHPUT_WINDOW_MINUTES
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_retries: default_max_retries(),
            throughput_window_minutes: default_throughput_window_minutes(),
            worker_pool: WorkerPoolConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl QueueManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::config("max_retries must be at least 1"));
        }
        if self.worker_pool.max_workers == 0 {
            return Err(Error::config("worker_pool.max_workers must be at least 1"));
        }
        if self.worker_pool.job_timeout_secs == 0 {
            return Err(Error::config("worker_pool.job_timeout_secs must be at least 1"));
        }
        if self.throughput_window_minutes <= 0 {
            return Err(Error::config("throughput_window_minutes must be positive"));
        }
        Ok(())
    }
}

/// Tally of one drain call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Execution attempts handed to the worker pool.
    pub dispatched: usize,
    pub completed: usize,
    /// Jobs that ended up permanently failed.
    pub failed: usize,
    pub requeued: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

/// Result of [`QueueManager::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain was already running; nothing was done.
    AlreadyRunning,
    Completed(DrainReport),
}

/// Clears the drain flag when a drain ends, however it ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Holds the jobs and schedules their execution.
pub struct QueueManager {
    config: QueueManagerConfig,
    factory: JobFactory,
    retry_policy: RetryPolicy,
    store: Arc<JobStore>,
    pool: WorkerPool,
    notifier: Arc<dyn NotificationSink>,
    event_tx: broadcast::Sender<PipelineEvent>,
    /// Tokens of dispatched jobs, by job id.
    cancellation_tokens: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
    is_processing: AtomicBool,
    drain_signal: Notify,
    drain_passes: AtomicU64,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl QueueManager {
    pub fn new(
        config: QueueManagerConfig,
        services: PipelineServices,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let store = Arc::new(JobStore::new(StatsCalculator::new(
            config.throughput_window_minutes,
            config.worker_pool.max_workers,
        )));
        let (event_tx, _) = broadcast::channel(1024);
        let executor = Arc::new(PipelineExecutor::new(
            config.executor.clone(),
            services,
            store.clone(),
            event_tx.clone(),
        ));
        let pool = WorkerPool::new(config.worker_pool.clone(), executor);

        Arc::new(Self {
            factory: JobFactory::new(config.max_retries),
            retry_policy: RetryPolicy::new(),
            store,
            pool,
            notifier,
            event_tx,
            cancellation_tokens: DashMap::new(),
            shutdown: CancellationToken::new(),
            is_processing: AtomicBool::new(false),
            drain_signal: Notify::new(),
            drain_passes: AtomicU64::new(0),
            dispatcher: parking_lot::Mutex::new(None),
            config,
        })
    }

    /// Start the debounced dispatcher. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return;
        }

        info!(
            max_workers = self.pool.max_workers(),
            debounce_ms = self.config.debounce_ms,
            "Starting queue manager"
        );

        let manager = self.clone();
        *dispatcher = Some(tokio::spawn(async move {
            manager.dispatch_loop().await;
        }));
    }

    /// Stop the dispatcher and cancel every in-flight job.
    pub async fn stop(&self) {
        info!("Stopping queue manager");
        self.shutdown.cancel();

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Dispatcher task failed: {}", e);
            }
        }
        info!("Queue manager stopped");
    }

    async fn dispatch_loop(&self) {
        let debounce = Duration::from_millis(self.config.debounce_ms);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.drain_signal.notified() => {}
            }

            // Every further signal inside the window restarts it.
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = self.drain_signal.notified() => continue,
                    _ = tokio::time::sleep(debounce) => break,
                }
            }

            match self.drain().await {
                DrainOutcome::AlreadyRunning => {
                    debug!("Drain already running, rescheduling");
                    self.schedule_drain();
                }
                DrainOutcome::Completed(report) => debug!(?report, "Drain finished"),
            }
        }
        debug!("Dispatcher exiting");
    }

    fn schedule_drain(&self) {
        self.drain_signal.notify_one();
    }

    /// Submit an uploaded asset. Returns the new job id.
    pub fn enqueue(&self, asset: &AssetDescriptor) -> Result<String> {
        if asset.asset_id.trim().is_empty() {
            return Err(Error::validation("asset id must not be empty"));
        }

        let job = self.factory.create_job(asset);
        let job_id = job.id.clone();
        info!(
            job_id = %job.id,
            asset_id = %job.asset_id,
            media_type = ?job.metadata.media_type,
            estimated_minutes = job.metadata.estimated_processing_minutes,
            "Job enqueued"
        );

        self.notifier.notify(Notification::queued(
            &job.id,
            &job.asset_id,
            &job.file_name,
            job.metadata.estimated_processing_minutes,
        ));
        self.emit(PipelineEvent::JobEnqueued {
            job_id: job.id.clone(),
            asset_id: job.asset_id.clone(),
        });
        self.store.insert(job);
        self.schedule_drain();

        Ok(job_id)
    }

    /// Reset a failed or cancelled job to a fresh queued attempt.
    ///
    /// Returns `None` (and changes nothing) for any other job.
    pub fn retry(&self, job_id: &str) -> Option<Job> {
        let job = self.store.update(job_id, |job| {
            if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
                return false;
            }
            job.reset_for_retry();
            true
        })?;

        info!(job_id, "Job retried");
        self.emit(PipelineEvent::JobRetried {
            job_id: job_id.to_string(),
        });
        self.schedule_drain();
        Some(job)
    }

    /// Cancel a queued or processing job, aborting its in-flight work.
    ///
    /// Terminal jobs are left unchanged and `None` is returned.
    pub fn cancel(&self, job_id: &str) -> Option<Job> {
        let job = self.store.update(job_id, |job| {
            if job.is_terminal() {
                return false;
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            true
        })?;

        if let Some((_, token)) = self.cancellation_tokens.remove(job_id) {
            token.cancel();
        }

        info!(job_id, "Job cancelled");
        self.emit(PipelineEvent::JobCancelled {
            job_id: job_id.to_string(),
        });
        Some(job)
    }

    /// Remove every completed, failed and cancelled job. Returns how many were removed.
    pub fn clear_completed_jobs(&self) -> usize {
        let count = self.store.retain(|job| !job.is_terminal());
        if count > 0 {
            info!(count, "Cleared finished jobs");
            self.emit(PipelineEvent::JobsCleared { count });
        }
        count
    }

    /// Process queued jobs until none is left to dispatch.
    ///
    /// Jobs requeued by the retry policy are picked up by a further pass within the same
    /// call. Returns [`DrainOutcome::AlreadyRunning`] if another drain holds the queue.
    pub async fn drain(&self) -> DrainOutcome {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return DrainOutcome::AlreadyRunning;
        }
        let _guard = ProcessingGuard(&self.is_processing);
        self.drain_passes.fetch_add(1, Ordering::SeqCst);

        let mut report = DrainReport::default();
        while !self.shutdown.is_cancelled() {
            report.failed += self.fail_exhausted();

            let job_ids: Vec<String> = self
                .store
                .jobs()
                .iter()
                .filter(|job| {
                    job.status == JobStatus::Queued && !self.retry_policy.is_exhausted(job)
                })
                .map(|job| job.id.clone())
                .collect();
            if job_ids.is_empty() {
                break;
            }

            debug!(jobs = job_ids.len(), "Dispatching queued jobs");
            self.emit(PipelineEvent::DrainStarted {
                jobs: job_ids.len(),
            });
            report.dispatched += job_ids.len();

            let items = job_ids
                .into_iter()
                .map(|job_id| {
                    let token = self.shutdown.child_token();
                    self.cancellation_tokens.insert(job_id.clone(), token.clone());
                    WorkItem { job_id, token }
                })
                .collect();

            let mut batch = self.pool.run_batch(items);
            while let Some((job_id, outcome)) = batch.next().await {
                self.handle_outcome(&job_id, outcome, &mut report);
            }
            batch.join().await;
        }

        self.emit(PipelineEvent::DrainFinished {
            completed: report.completed,
            failed: report.failed,
            requeued: report.requeued,
        });
        DrainOutcome::Completed(report)
    }

    fn handle_outcome(&self, job_id: &str, outcome: ExecutionOutcome, report: &mut DrainReport) {
        self.cancellation_tokens.remove(job_id);

        match outcome {
            ExecutionOutcome::Completed => {
                report.completed += 1;
                if let Some(job) = self.store.get(job_id) {
                    self.notifier.notify(Notification::completed(
                        &job.id,
                        &job.asset_id,
                        &job.file_name,
                    ));
                }
            }
            ExecutionOutcome::Failed { error } => {
                let requeued = self.store.update(job_id, |job| {
                    job.status == JobStatus::Failed && self.retry_policy.requeue(job, error.clone())
                });
                match requeued {
                    Some(job) => {
                        report.requeued += 1;
                        info!(
                            job_id,
                            retry_count = job.retry_count,
                            max_retries = job.max_retries,
                            "Job requeued"
                        );
                        self.emit(PipelineEvent::JobRequeued {
                            job_id: job_id.to_string(),
                            retry_count: job.retry_count,
                        });
                    }
                    None => {
                        report.failed += 1;
                        if let Some(job) = self.store.get(job_id) {
                            self.notify_failed(&job, &error);
                        }
                    }
                }
            }
            ExecutionOutcome::Cancelled => report.cancelled += 1,
            ExecutionOutcome::Skipped => report.skipped += 1,
        }
    }

    /// Fail queued jobs whose retries are used up. Returns how many were failed.
    fn fail_exhausted(&self) -> usize {
        let exhausted: Vec<String> = self
            .store
            .jobs()
            .iter()
            .filter(|job| job.status == JobStatus::Queued && self.retry_policy.is_exhausted(job))
            .map(|job| job.id.clone())
            .collect();

        let mut failed = 0;
        for job_id in exhausted {
            let job = self.store.update(&job_id, |job| {
                if job.status != JobStatus::Queued {
                    return false;
                }
                let error = job.last_error.clone().unwrap_or_else(|| {
                    format!("RetryExhausted: gave up after {} retries", job.retry_count)
                });
                job.status = JobStatus::Failed;
                job.error = Some(error);
                job.completed_at = Some(Utc::now());
                true
            });

            if let Some(job) = job {
                failed += 1;
                let error = job.error.clone().unwrap_or_default();
                warn!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    error = %error,
                    "Job failed permanently"
                );
                self.notify_failed(&job, &error);
            }
        }
        failed
    }

    fn notify_failed(&self, job: &Job, error: &str) {
        self.notifier.notify(Notification::failed(
            &job.id,
            &job.asset_id,
            &job.file_name,
            error,
        ));
    }

    /// Wait until no job is queued or processing, or the manager stops.
    pub async fn wait_idle(&self) {
        let mut rx = self.store.subscribe();
        loop {
            if !self.store.has_active_jobs() {
                return;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    pub fn jobs(&self) -> Arc<Vec<Job>> {
        self.store.jobs()
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.store.get(job_id)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.store.snapshot().queue
    }

    pub fn processing_stats(&self) -> ProcessingStats {
        self.store.snapshot().processing
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.store.snapshot()
    }

    /// Snapshots published after every change to the job collection.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PipelineSnapshot>> {
        self.store.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Number of drain calls that actually ran.
    pub fn drain_passes(&self) -> u64 {
        self.drain_passes.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    /// Number of workers currently executing a job.
    pub fn active_workers(&self) -> usize {
        self.pool.active_count()
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.event_tx.send(event);
    }
}
