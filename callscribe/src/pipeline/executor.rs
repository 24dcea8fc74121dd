//! Drives a single job through the stage sequence.
//!
//! | stage         | progress | work                         |
//! |---------------|----------|------------------------------|
//! | validation    | 10       | resolve the asset source     |
//! | transcription | 20, 40   | fetch media, transcribe      |
//! | transcription | 60       | transcript received          |
//! | analysis      | 70, 80   | summarize                    |
//! | summary       | 85       | write the asset record       |
//! | completion    | 100      | job completed                |
//!
//! Every collaborator call is raced against the job's cancellation token. Failures are
//! recorded on the job and never escape `run`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::PipelineEvent;
use super::job::{Job, JobStatus, Stage};
use super::store::JobStore;
use crate::services::{AssetRecordUpdate, PipelineServices};
use crate::{Error, Result};

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Attempts at marking the asset record failed.
    #[serde(default = "default_status_write_attempts")]
    pub status_write_attempts: u32,
    /// Backoff between those attempts, multiplied by the attempt number.
    #[serde(default = "default_status_write_backoff_ms")]
    pub status_write_backoff_ms: u64,
}

fn default_status_write_attempts() -> u32 {
    3
}

fn default_status_write_backoff_ms() -> u64 {
    250
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            status_write_attempts: default_status_write_attempts(),
            status_write_backoff_ms: default_status_write_backoff_ms(),
        }
    }
}

/// How one execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed { error: String },
    Cancelled,
    /// The job was no longer queued when the attempt began.
    Skipped,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Runs jobs against the pipeline collaborators.
pub struct PipelineExecutor {
    config: ExecutorConfig,
    services: PipelineServices,
    store: Arc<JobStore>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineExecutor {
    pub fn new(
        config: ExecutorConfig,
        services: PipelineServices,
        store: Arc<JobStore>,
        event_tx: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            config,
            services,
            store,
            event_tx,
        }
    }

    /// Run one attempt of a queued job.
    pub async fn run(&self, job_id: &str, token: &CancellationToken) -> ExecutionOutcome {
        let Some(job) = self.begin(job_id) else {
            debug!(job_id, "Job is no longer queued, skipping");
            return ExecutionOutcome::Skipped;
        };

        let started = Instant::now();
        info!(
            job_id,
            asset_id = %job.asset_id,
            attempt = job.retry_count + 1,
            "Processing job"
        );

        match self.process(&job, token).await {
            Ok(()) => self.complete(job_id, started),
            Err(e) if e.is_cancelled() => {
                self.mark_cancelled(job_id);
                ExecutionOutcome::Cancelled
            }
            Err(e) => self.record_failure(job_id, e).await,
        }
    }

    async fn process(&self, job: &Job, token: &CancellationToken) -> Result<()> {
        let job_id = job.id.as_str();

        let mut source = guard(job_id, token, self.services.resolver.resolve(&job.asset_id))
            .await?
            .ok_or_else(|| {
                Error::validation(format!("asset {} has no retrievable source", job.asset_id))
            })?;
        if source.location.trim().is_empty() {
            return Err(Error::validation(format!(
                "asset {} has an empty source location",
                job.asset_id
            )));
        }
        if source.file_name.is_none() {
            source.file_name = Some(job.file_name.clone());
        }

        self.advance(job_id, Stage::Transcription, 20)?;
        let media = guard(job_id, token, self.services.fetcher.fetch(&source.location)).await?;
        debug!(job_id, size = media.len(), "Media fetched");

        self.advance(job_id, Stage::Transcription, 40)?;
        let result = guard(job_id, token, self.services.transcriber.transcribe(media, &source)).await?;
        let transcript = match result.transcript.as_deref().map(str::trim) {
            Some(text) if result.success && !text.is_empty() => text.to_string(),
            _ => {
                return Err(Error::transcription(
                    result
                        .error
                        .unwrap_or_else(|| "no transcript returned".to_string()),
                ));
            }
        };
        self.advance(job_id, Stage::Transcription, 60)?;

        self.advance(job_id, Stage::Analysis, 70)?;
        let summary = guard(job_id, token, self.services.summarizer.summarize(&transcript)).await?;
        self.advance(job_id, Stage::Analysis, 80)?;

        self.advance(job_id, Stage::Summary, 85)?;
        let duration = result.duration_seconds.or(job.metadata.duration_seconds);
        let update = AssetRecordUpdate::completed(transcript, summary, duration);
        guard(
            job_id,
            token,
            self.services
                .asset_store
                .update_asset_record(&job.asset_id, &update),
        )
        .await?;

        Ok(())
    }

    /// Move a queued job to processing. `None` if it is not queued.
    fn begin(&self, job_id: &str) -> Option<Job> {
        let job = self.store.update(job_id, |job| {
            if job.status != JobStatus::Queued {
                return false;
            }
            job.status = JobStatus::Processing;
            job.stage = Stage::Validation;
            job.progress = 10;
            job.started_at = Some(Utc::now());
            job.completed_at = None;
            job.error = None;
            true
        })?;

        self.emit(PipelineEvent::JobStarted {
            job_id: job_id.to_string(),
        });
        self.emit(PipelineEvent::JobProgress {
            job_id: job_id.to_string(),
            stage: job.stage,
            progress: job.progress,
        });
        Some(job)
    }

    /// Record stage and progress; neither ever moves backwards.
    ///
    /// Fails with `Cancelled` once the job has left the processing state.
    fn advance(&self, job_id: &str, stage: Stage, progress: u8) -> Result<()> {
        let job = self
            .store
            .update(job_id, |job| {
                if job.status != JobStatus::Processing {
                    return false;
                }
                job.stage = job.stage.max(stage);
                job.progress = job.progress.max(progress.min(100));
                true
            })
            .ok_or_else(|| Error::Cancelled(job_id.to_string()))?;

        self.emit(PipelineEvent::JobProgress {
            job_id: job_id.to_string(),
            stage: job.stage,
            progress: job.progress,
        });
        Ok(())
    }

    fn complete(&self, job_id: &str, started: Instant) -> ExecutionOutcome {
        let completed = self.store.update(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Completed;
            job.stage = Stage::Completion;
            job.progress = 100;
            job.completed_at = Some(Utc::now());
            true
        });

        if completed.is_none() {
            return ExecutionOutcome::Cancelled;
        }

        let duration_secs = started.elapsed().as_secs_f64();
        info!(job_id, duration_secs, "Job completed");
        self.emit(PipelineEvent::JobProgress {
            job_id: job_id.to_string(),
            stage: Stage::Completion,
            progress: 100,
        });
        self.emit(PipelineEvent::JobCompleted {
            job_id: job_id.to_string(),
            duration_secs,
        });
        ExecutionOutcome::Completed
    }

    fn mark_cancelled(&self, job_id: &str) {
        let cancelled = self.store.update(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            true
        });
        if cancelled.is_some() {
            self.emit(PipelineEvent::JobCancelled {
                job_id: job_id.to_string(),
            });
        }
        info!(job_id, "Job cancelled");
    }

    /// Mark a processing job failed and write the failure to its asset record.
    ///
    /// Errors outside the job taxonomy are stored as `UnknownError`.
    ///
    /// Jobs that already left the processing state (for example through `cancel`) are left
    /// alone and reported as cancelled.
    pub async fn record_failure(&self, job_id: &str, error: Error) -> ExecutionOutcome {
        let message = error.into_job_error().to_string();
        let failed = self.store.update(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Failed;
            job.error = Some(message.clone());
            job.completed_at = Some(Utc::now());
            true
        });

        let Some(job) = failed else {
            return ExecutionOutcome::Cancelled;
        };

        warn!(
            job_id,
            asset_id = %job.asset_id,
            stage = %job.stage,
            error = %message,
            "Job failed"
        );
        self.emit(PipelineEvent::JobFailed {
            job_id: job_id.to_string(),
            error: message.clone(),
        });

        self.persist_failure(&job).await;
        ExecutionOutcome::Failed { error: message }
    }

    async fn persist_failure(&self, job: &Job) {
        let attempts = self.config.status_write_attempts.max(1);
        let update = AssetRecordUpdate::failed();

        for attempt in 1..=attempts {
            match self
                .services
                .asset_store
                .update_asset_record(&job.asset_id, &update)
                .await
            {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        asset_id = %job.asset_id,
                        attempt,
                        error = %e,
                        "Failed to mark asset record as failed"
                    );
                    if attempt < attempts {
                        let backoff = self.config.status_write_backoff_ms * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        error!(
            job_id = %job.id,
            asset_id = %job.asset_id,
            attempts,
            "Asset record still shows the job in progress after every status write failed"
        );
        self.emit(PipelineEvent::StatusWriteFailed {
            job_id: job.id.clone(),
            asset_id: job.asset_id.clone(),
        });
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Await `fut` unless the token fires first.
async fn guard<T, F>(job_id: &str, token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled(job_id.to_string())),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::factory::JobFactory;
    use crate::pipeline::job::AssetDescriptor;
    use crate::pipeline::stats::StatsCalculator;
    use crate::pipeline::test_support::TestServices;
    use crate::pipeline::MediaType;
    use crate::services::{AssetRecordStatus, AssetResolver, AssetSource};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    struct Harness {
        doubles: TestServices,
        store: Arc<JobStore>,
        executor: PipelineExecutor,
        events: broadcast::Receiver<PipelineEvent>,
    }

    struct BrokenResolver;

    #[async_trait]
    impl AssetResolver for BrokenResolver {
        async fn resolve(&self, _asset_id: &str) -> Result<Option<AssetSource>> {
            Err(Error::from(std::io::Error::other("disk gone")))
        }
    }

    fn harness(config: ExecutorConfig) -> Harness {
        harness_with(config, |services| services)
    }

    fn harness_with<F>(config: ExecutorConfig, customize: F) -> Harness
    where
        F: FnOnce(PipelineServices) -> PipelineServices,
    {
        let doubles = TestServices::new();
        let store = Arc::new(JobStore::new(StatsCalculator::default()));
        let (event_tx, events) = broadcast::channel(256);
        let executor =
            PipelineExecutor::new(config, customize(doubles.services()), store.clone(), event_tx);
        Harness {
            doubles,
            store,
            executor,
            events,
        }
    }

    fn enqueue(h: &Harness, asset_id: &str) -> String {
        let job = JobFactory::default()
            .create_job(&AssetDescriptor::new(asset_id, 5 * 1_048_576, "wav"));
        let id = job.id.clone();
        h.store.insert(job);
        id
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            status_write_attempts: 3,
            status_write_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_successful_run() {
        let h = harness(fast_config());
        h.doubles.register("a1");
        let id = enqueue(&h, "a1");

        let outcome = h.executor.run(&id, &CancellationToken::new()).await;
        assert!(outcome.is_success());

        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stage, Stage::Completion);
        assert_eq!(job.progress, 100);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.error.is_none());

        let record = h.doubles.asset_store.records.latest("a1").unwrap();
        assert_eq!(record.status, AssetRecordStatus::Completed);
        assert!(record.transcript.unwrap().contains("schedule the demo"));
        assert!(record.summary.is_some());
        assert_eq!(record.duration, Some(95.0));
    }

    #[tokio::test]
    async fn test_progress_and_stage_never_regress() {
        let mut h = harness(fast_config());
        h.doubles.register("a1");
        let id = enqueue(&h, "a1");

        h.executor.run(&id, &CancellationToken::new()).await;

        let mut seen = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            if let PipelineEvent::JobProgress {
                stage, progress, ..
            } = event
            {
                seen.push((stage, progress));
            }
        }

        let progress: Vec<u8> = seen.iter().map(|(_, p)| *p).collect();
        assert_eq!(progress, vec![10, 20, 40, 60, 70, 80, 85, 100]);
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
    }

    #[tokio::test]
    async fn test_transcription_failure_marks_job_failed() {
        let h = harness(fast_config());
        h.doubles.register("a1");
        h.doubles.transcriber.fail_next(1);
        let id = enqueue(&h, "a1");

        let outcome = h.executor.run(&id, &CancellationToken::new()).await;
        assert!(!outcome.is_success());

        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().starts_with("TranscriptionError"));
        assert_eq!(job.stage, Stage::Transcription);
        assert!(job.completed_at.is_some());

        let record = h.doubles.asset_store.records.latest("a1").unwrap();
        assert_eq!(record.status, AssetRecordStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_source_is_validation_error() {
        let h = harness(fast_config());
        let id = enqueue(&h, "unknown");

        let outcome = h.executor.run(&id, &CancellationToken::new()).await;
        match outcome {
            ExecutionOutcome::Failed { error } => assert!(error.starts_with("ValidationError")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.doubles.transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn test_summarization_failure() {
        let h = harness(fast_config());
        h.doubles.register("a1");
        h.doubles.summarizer.failures.store(1, Ordering::SeqCst);
        let id = enqueue(&h, "a1");

        h.executor.run(&id, &CancellationToken::new()).await;

        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("SummarizationError"));
        assert_eq!(job.stage, Stage::Analysis);
    }

    #[tokio::test]
    async fn test_failure_status_write_is_retried() {
        let h = harness(fast_config());
        h.doubles.register("a1");
        h.doubles.transcriber.fail_next(1);
        h.doubles.asset_store.failures.store(2, Ordering::SeqCst);
        let id = enqueue(&h, "a1");

        h.executor.run(&id, &CancellationToken::new()).await;

        let records = h.doubles.asset_store.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.status, AssetRecordStatus::Failed);
    }

    #[tokio::test]
    async fn test_exhausted_status_writes_emit_event() {
        let mut h = harness(fast_config());
        h.doubles.register("a1");
        h.doubles.transcriber.fail_next(1);
        h.doubles.asset_store.failures.store(10, Ordering::SeqCst);
        let id = enqueue(&h, "a1");

        h.executor.run(&id, &CancellationToken::new()).await;

        assert!(h.doubles.asset_store.records.records().is_empty());
        let mut reported = false;
        while let Ok(event) = h.events.try_recv() {
            if matches!(event, PipelineEvent::StatusWriteFailed { .. }) {
                reported = true;
            }
        }
        assert!(reported);
        assert_eq!(h.store.get(&id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let h = Arc::new(harness(fast_config()));
        h.doubles.register("a1");
        h.doubles.transcriber.set_delay(Duration::from_secs(30));
        let id = enqueue(&h, "a1");

        let token = CancellationToken::new();
        let task = {
            let h = h.clone();
            let id = id.clone();
            let token = token.clone();
            tokio::spawn(async move { h.executor.run(&id, &token).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Cancelled);

        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.error.is_none());
        // No status write on cancel.
        assert!(h.doubles.asset_store.records.records().is_empty());
    }

    #[tokio::test]
    async fn test_non_queued_job_is_skipped() {
        let h = harness(fast_config());
        h.doubles.register("a1");
        let id = enqueue(&h, "a1");
        h.store.update(&id, |job| {
            job.status = JobStatus::Cancelled;
            true
        });

        let outcome = h.executor.run(&id, &CancellationToken::new()).await;
        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert_eq!(h.executor.run("missing", &CancellationToken::new()).await, ExecutionOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_record_failure_ignores_cancelled_job() {
        let h = harness(fast_config());
        let id = enqueue(&h, "a1");
        h.store.update(&id, |job| {
            job.status = JobStatus::Cancelled;
            true
        });

        let outcome = h.executor.record_failure(&id, Error::Timeout(5)).await;
        assert_eq!(outcome, ExecutionOutcome::Cancelled);
        assert_eq!(h.store.get(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_foreign_errors_are_stored_as_unknown() {
        let h = harness_with(fast_config(), |services| PipelineServices {
            resolver: Arc::new(BrokenResolver),
            ..services
        });
        let id = enqueue(&h, "a1");

        h.executor.run(&id, &CancellationToken::new()).await;

        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("UnknownError: IO error: disk gone"));
        let breakdown = h.store.snapshot().processing.error_breakdown;
        assert_eq!(breakdown.get("UnknownError"), Some(&1));
        assert_eq!(breakdown.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_source_location_is_validation_error() {
        let h = harness(fast_config());
        h.doubles
            .registry
            .register("a1", AssetSource::new("   ", MediaType::Audio));
        let id = enqueue(&h, "a1");

        h.executor.run(&id, &CancellationToken::new()).await;

        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("ValidationError"));
        assert_eq!(job.stage, Stage::Validation);
        assert_eq!(h.doubles.transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_job_failed() {
        let h = harness(fast_config());
        h.doubles.registry.register(
            "a1",
            AssetSource::new("https://media.test/unreachable.wav", MediaType::Audio),
        );
        let id = enqueue(&h, "a1");

        let outcome = h.executor.run(&id, &CancellationToken::new()).await;
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));

        let job = h.store.get(&id).unwrap();
        assert!(job.error.unwrap().starts_with("FetchError"));
        assert_eq!(job.stage, Stage::Transcription);
        assert_eq!(job.progress, 20);
        assert_eq!(h.doubles.transcriber.calls(), 0);
        assert_eq!(
            h.doubles.asset_store.records.latest("a1").unwrap().status,
            AssetRecordStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_completion_write_failure_is_persistence_error() {
        let h = harness(fast_config());
        h.doubles.register("a1");
        h.doubles.asset_store.failures.store(1, Ordering::SeqCst);
        let id = enqueue(&h, "a1");

        h.executor.run(&id, &CancellationToken::new()).await;

        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("PersistenceError"));
        assert_eq!(job.stage, Stage::Summary);
        assert_eq!(job.progress, 85);

        // The completed write was rejected; the follow-up failure write went through.
        let records = h.doubles.asset_store.records.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.status, AssetRecordStatus::Failed);
    }
}
