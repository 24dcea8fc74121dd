//! Queue and processing statistics derived from a job collection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::job::{Job, JobStatus};

/// Default trailing window for throughput, in minutes.
pub const DEFAULT_THROUGHPUT_WINDOW_MINUTES: i64 = 60;

/// Load contributed by each processing job to `system_load`.
const LOAD_PER_PROCESSING_JOB: f64 = 20.0;

/// Key used in the error breakdown for failed jobs without a message.
const UNKNOWN_ERROR_KEY: &str = "Unknown";

/// Occupancy of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean `completed_at - started_at` over completed jobs.
    pub avg_processing_time_minutes: f64,
    /// Jobs completed within the trailing throughput window.
    pub current_throughput: usize,
}

/// Derived performance figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Jobs per hour at the current average processing time.
    pub transcription_speed: f64,
    pub quality_score: f64,
    /// 20 points per processing job, capped at 100.
    pub system_load: f64,
    /// Share of worker slots currently busy, 0..=100.
    pub worker_utilization: f64,
}

/// Processing performance over finished jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Completed plus failed jobs.
    pub total_processed: usize,
    /// Percentage of processed jobs that completed, 0..=100.
    pub success_rate: f64,
    pub avg_processing_time_minutes: f64,
    pub total_processing_time_minutes: f64,
    /// Failed jobs grouped by the leading token of their error message.
    pub error_breakdown: BTreeMap<String, usize>,
    pub performance_metrics: PerformanceMetrics,
}

/// Computes [`QueueStats`] and [`ProcessingStats`] from job snapshots.
#[derive(Debug, Clone, Copy)]
pub struct StatsCalculator {
    throughput_window: Duration,
    max_workers: usize,
}

impl Default for StatsCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_THROUGHPUT_WINDOW_MINUTES, 1)
    }
}

impl StatsCalculator {
    pub fn new(throughput_window_minutes: i64, max_workers: usize) -> Self {
        Self {
            throughput_window: Duration::minutes(throughput_window_minutes.max(1)),
            max_workers: max_workers.max(1),
        }
    }

    /// Queue occupancy as of `now`.
    pub fn queue_stats(&self, jobs: &[Job], now: DateTime<Utc>) -> QueueStats {
        let mut stats = QueueStats {
            total: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        let (_, avg) = completed_durations(jobs);
        stats.avg_processing_time_minutes = avg;

        let window_start = now - self.throughput_window;
        stats.current_throughput = jobs
            .iter()
            .filter(|job| job.status == JobStatus::Completed)
            .filter_map(|job| job.completed_at)
            .filter(|completed| *completed >= window_start)
            .count();

        stats
    }

    /// Processing performance over the collection.
    pub fn processing_stats(&self, jobs: &[Job]) -> ProcessingStats {
        let completed = count_status(jobs, JobStatus::Completed);
        let failed = count_status(jobs, JobStatus::Failed);
        let processing = count_status(jobs, JobStatus::Processing);
        let total_processed = completed + failed;

        let success_rate = if total_processed == 0 {
            0.0
        } else {
            completed as f64 / total_processed as f64 * 100.0
        };

        let (total, avg) = completed_durations(jobs);

        let mut error_breakdown = BTreeMap::new();
        for job in jobs.iter().filter(|job| job.status == JobStatus::Failed) {
            *error_breakdown
                .entry(error_category(job.error.as_deref()))
                .or_insert(0) += 1;
        }

        let transcription_speed = if avg > 0.0 { 60.0 / avg } else { 0.0 };
        let performance_metrics = PerformanceMetrics {
            transcription_speed,
            quality_score: success_rate,
            system_load: (processing as f64 * LOAD_PER_PROCESSING_JOB).min(100.0),
            worker_utilization: (processing as f64 / self.max_workers as f64 * 100.0).min(100.0),
        };

        ProcessingStats {
            total_processed,
            success_rate,
            avg_processing_time_minutes: avg,
            total_processing_time_minutes: total,
            error_breakdown,
            performance_metrics,
        }
    }
}

fn count_status(jobs: &[Job], status: JobStatus) -> usize {
    jobs.iter().filter(|job| job.status == status).count()
}

/// Sum and mean processing minutes over completed jobs.
fn completed_durations(jobs: &[Job]) -> (f64, f64) {
    let durations: Vec<f64> = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Completed)
        .filter_map(Job::processing_minutes)
        .collect();

    if durations.is_empty() {
        return (0.0, 0.0);
    }
    let total: f64 = durations.iter().sum();
    (total, total / durations.len() as f64)
}

/// Leading token of an error message, delimited by `:`.
fn error_category(error: Option<&str>) -> String {
    error
        .and_then(|e| e.split(':').next())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .unwrap_or(UNKNOWN_ERROR_KEY)
        .to_string()
}
