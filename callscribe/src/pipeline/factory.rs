//! Job construction and processing-time estimation.

use chrono::Utc;

use super::job::{AssetDescriptor, DEFAULT_MAX_RETRIES, Job, JobMetadata, JobStatus, MediaType, Stage};

const BYTES_PER_MB: f64 = 1_048_576.0;
const MIN_TRANSCRIPTION_OVERHEAD_MINUTES: f64 = 2.0;
const ANALYSIS_OVERHEAD_MINUTES: f64 = 1.0;

/// Builds [`Job`] records from uploaded asset descriptors.
#[derive(Debug, Clone, Copy)]
pub struct JobFactory {
    max_retries: u32,
}

impl Default for JobFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl JobFactory {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Create a queued job for an asset.
    pub fn create_job(&self, asset: &AssetDescriptor) -> Job {
        let media_type = asset.resolved_media_type();
        Job {
            id: uuid::Uuid::new_v4().to_string(),
            asset_id: asset.asset_id.clone(),
            file_name: if asset.file_name.trim().is_empty() {
                asset.asset_id.clone()
            } else {
                asset.file_name.clone()
            },
            status: JobStatus::Queued,
            stage: Stage::Upload,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            last_error: None,
            retry_count: 0,
            max_retries: self.max_retries,
            metadata: JobMetadata {
                file_size_bytes: asset.file_size_bytes,
                duration_seconds: asset.duration_seconds,
                format: asset.format.clone(),
                media_type,
                estimated_processing_minutes: estimate_processing_minutes(
                    asset.file_size_bytes,
                    media_type,
                ),
            },
        }
    }
}

/// Estimate how long an asset takes to process, in whole minutes.
///
/// Video costs twice as much per megabyte as audio. Transcription adds half a minute per
/// megabyte (never less than two) and analysis a flat minute, so the result is at least 3.
pub fn estimate_processing_minutes(file_size_bytes: u64, media_type: MediaType) -> u32 {
    let file_size_mb = file_size_bytes as f64 / BYTES_PER_MB;
    let per_mb_rate = match media_type {
        MediaType::Audio => 1.0,
        MediaType::Video => 2.0,
    };
    let base = file_size_mb * per_mb_rate;
    let transcription_overhead = (file_size_mb * 0.5).max(MIN_TRANSCRIPTION_OVERHEAD_MINUTES);

    (base + transcription_overhead + ANALYSIS_OVERHEAD_MINUTES).ceil() as u32
}
