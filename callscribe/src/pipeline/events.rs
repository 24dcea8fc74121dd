use super::job::Stage;

/// Events emitted while jobs move through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Job enqueued.
    JobEnqueued { job_id: String, asset_id: String },
    /// Job started processing.
    JobStarted { job_id: String },
    /// Job advanced to a new stage or progress value.
    JobProgress {
        job_id: String,
        stage: Stage,
        progress: u8,
    },
    /// Job completed successfully.
    JobCompleted { job_id: String, duration_secs: f64 },
    /// Job attempt failed.
    JobFailed { job_id: String, error: String },
    /// Failed job was put back in the queue automatically.
    JobRequeued { job_id: String, retry_count: u32 },
    /// Job was cancelled.
    JobCancelled { job_id: String },
    /// Failed or cancelled job was reset by an explicit retry.
    JobRetried { job_id: String },
    /// Terminal jobs were removed.
    JobsCleared { count: usize },
    /// A drain pass started with this many jobs.
    DrainStarted { jobs: usize },
    /// A drain pass finished.
    DrainFinished {
        completed: usize,
        failed: usize,
        requeued: usize,
    },
    /// The asset record could not be marked as failed.
    StatusWriteFailed { job_id: String, asset_id: String },
}
