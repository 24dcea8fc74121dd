//! Media processing pipeline.
//!
//! Uploaded assets become [`Job`]s through the [`JobFactory`] and wait in the
//! [`QueueManager`]. A drain pass hands queued jobs to the [`WorkerPool`], whose workers run
//! them through the [`PipelineExecutor`]:
//!
//! ```text
//! enqueue -> queued -> processing (validation, transcription, analysis, summary)
//!                          |-> completed
//!                          |-> failed -> requeued while retries remain
//!                          `-> cancelled
//! ```
//!
//! Every change to the job collection publishes a [`PipelineSnapshot`] with fresh
//! [`QueueStats`] and [`ProcessingStats`].

mod events;
mod executor;
mod factory;
mod job;
mod manager;
mod retry;
mod stats;
mod store;
mod worker_pool;

#[cfg(test)]
pub(crate) mod test_support;

pub use events::PipelineEvent;
pub use executor::{ExecutionOutcome, ExecutorConfig, PipelineExecutor};
pub use factory::{JobFactory, estimate_processing_minutes};
pub use job::{AssetDescriptor, DEFAULT_MAX_RETRIES, Job, JobMetadata, JobStatus, MediaType, Stage};
pub use manager::{DrainOutcome, DrainReport, QueueManager, QueueManagerConfig};
pub use retry::RetryPolicy;
pub use stats::{PerformanceMetrics, ProcessingStats, QueueStats, StatsCalculator};
pub use store::{JobStore, PipelineSnapshot};
pub use worker_pool::{WorkItem, WorkerPool, WorkerPoolConfig};
