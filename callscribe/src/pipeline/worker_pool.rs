//! Bounded worker pool for drain passes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::executor::{ExecutionOutcome, PipelineExecutor};
use crate::Error;

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent workers. One worker processes jobs strictly in order.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Job timeout in seconds.
    ///
    /// A job exceeding this duration has its attempt dropped and is failed with a
    /// `TimeoutError`.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_max_workers() -> usize {
    1
}

fn default_job_timeout_secs() -> u64 {
    3600
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: String,
    pub token: CancellationToken,
}

/// Workers running one drain pass.
pub struct Batch {
    results: mpsc::UnboundedReceiver<(String, ExecutionOutcome)>,
    workers: JoinSet<()>,
}

impl Batch {
    /// Next finished job, in completion order. `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<(String, ExecutionOutcome)> {
        self.results.recv().await
    }

    /// Wait for every worker to exit.
    pub async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
    }
}

/// A pool of workers executing jobs.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    executor: Arc<PipelineExecutor>,
    active_workers: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, executor: Arc<PipelineExecutor>) -> Self {
        Self {
            config,
            executor,
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn workers for `items`.
    ///
    /// Items are picked up in order; at most `max_workers` run at once.
    pub fn run_batch(&self, items: Vec<WorkItem>) -> Batch {
        let worker_count = self.max_workers().min(items.len().max(1));
        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);
        let timeout_secs = self.config.job_timeout_secs;

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        for item in items {
            if work_tx.send(item).is_err() {
                break;
            }
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let (result_tx, results) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let executor = self.executor.clone();
            let active_workers = self.active_workers.clone();

            workers.spawn(async move {
                debug!("Worker {} started", worker_id);
                loop {
                    let item: Option<WorkItem> = work_rx.lock().await.recv().await;
                    let Some(item) = item else {
                        break;
                    };

                    if item.token.is_cancelled() {
                        if result_tx.send((item.job_id, ExecutionOutcome::Skipped)).is_err() {
                            break;
                        }
                        continue;
                    }

                    active_workers.fetch_add(1, Ordering::SeqCst);
                    let outcome = match tokio::time::timeout(
                        job_timeout,
                        executor.run(&item.job_id, &item.token),
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(
                                job_id = %item.job_id,
                                timeout_secs, "Job timed out"
                            );
                            executor
                                .record_failure(&item.job_id, Error::Timeout(timeout_secs))
                                .await
                        }
                    };
                    active_workers.fetch_sub(1, Ordering::SeqCst);

                    if result_tx.send((item.job_id, outcome)).is_err() {
                        break;
                    }
                }
                debug!("Worker {} exiting", worker_id);
            });
        }

        Batch { results, workers }
    }

    /// Number of workers currently executing a job.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers.max(1)
    }
}
