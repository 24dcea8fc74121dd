//! Retry policy for failed jobs.

use super::job::{Job, JobStatus, Stage};

/// Bounds how many times a failed job is automatically requeued.
///
/// The bound itself lives on each job (`max_retries`) so jobs created under different
/// configurations keep their own budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Whether a job that just failed should go back to the queue.
    pub fn should_requeue(&self, job: &Job) -> bool {
        job.retry_count < job.max_retries
    }

    /// Whether the job has used up its automatic retries.
    pub fn is_exhausted(&self, job: &Job) -> bool {
        job.retry_count >= job.max_retries
    }

    /// Put a failed attempt back in the queue, consuming one retry.
    ///
    /// Returns `false` and leaves the job untouched when the budget is spent.
    pub fn requeue(&self, job: &mut Job, error: impl Into<String>) -> bool {
        if !self.should_requeue(job) {
            return false;
        }
        job.retry_count += 1;
        job.status = JobStatus::Queued;
        job.stage = Stage::Upload;
        job.progress = 0;
        job.error = None;
        job.last_error = Some(error.into());
        job.started_at = None;
        job.completed_at = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::factory::JobFactory;
    use crate::pipeline::job::AssetDescriptor;

    fn failed_job(retry_count: u32) -> Job {
        let mut job = JobFactory::default().create_job(&AssetDescriptor::new("a", 1024, "wav"));
        job.status = JobStatus::Processing;
        job.stage = Stage::Transcription;
        job.progress = 40;
        job.retry_count = retry_count;
        job
    }

    #[test]
    fn test_should_requeue_below_budget() {
        let policy = RetryPolicy::new();
        assert!(policy.should_requeue(&failed_job(0)));
        assert!(policy.should_requeue(&failed_job(2)));
        assert!(!policy.should_requeue(&failed_job(3)));
        assert!(policy.is_exhausted(&failed_job(3)));
    }

    #[test]
    fn test_requeue_increments_by_one_and_resets_attempt() {
        let policy = RetryPolicy::new();
        let mut job = failed_job(1);

        assert!(policy.requeue(&mut job, "FetchError: 503"));
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, Stage::Upload);
        assert_eq!(job.progress, 0);
        assert!(job.error.is_none());
        assert_eq!(job.last_error.as_deref(), Some("FetchError: 503"));
    }

    #[test]
    fn test_requeue_never_exceeds_max_retries() {
        let policy = RetryPolicy::new();
        let mut job = failed_job(0);
        while policy.requeue(&mut job, "TranscriptionError: down") {}

        assert_eq!(job.retry_count, job.max_retries);
        assert!(!policy.requeue(&mut job, "TranscriptionError: down"));
        assert_eq!(job.retry_count, job.max_retries);
    }
}
