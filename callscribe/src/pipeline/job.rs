//! Job model for the media processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of automatic re-attempts for a failed job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is waiting to be processed.
    Queued,
    /// Job is currently being processed.
    Processing,
    /// Job completed successfully.
    Completed,
    /// Job failed.
    Failed,
    /// Job was cancelled by a caller.
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never change again except through an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// Ordered phase of a job's execution.
///
/// The derived `Ord` follows declaration order, which is the order stages are visited in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upload,
    Validation,
    Transcription,
    Analysis,
    Summary,
    Completion,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Upload => "upload",
            Stage::Validation => "validation",
            Stage::Transcription => "transcription",
            Stage::Analysis => "analysis",
            Stage::Summary => "summary",
            Stage::Completion => "completion",
        };
        f.pad(s)
    }
}

/// Kind of media carried by an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Audio,
    Video,
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];

impl MediaType {
    /// Classify a MIME type (`video/mp4`) or a bare extension (`mov`).
    ///
    /// Anything that is not recognisably video is treated as audio.
    pub fn from_format(format: &str) -> Self {
        let format = format.trim().to_ascii_lowercase();
        if format.starts_with("video/") {
            return Self::Video;
        }
        let ext = format
            .rsplit(|c| c == '.' || c == '/')
            .next()
            .unwrap_or(format.as_str());
        if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else {
            Self::Audio
        }
    }
}

/// Descriptor of an uploaded asset submitted for processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Id of the external media record.
    pub asset_id: String,
    /// Original file name, for display.
    #[serde(default)]
    pub file_name: String,
    /// Size of the uploaded file in bytes.
    pub file_size_bytes: u64,
    /// MIME type or extension as reported by the upload.
    pub format: String,
    /// Declared media type; derived from `format` when absent.
    #[serde(default)]
    pub media_type: Option<MediaType>,
    /// Duration if the uploader already knows it.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl AssetDescriptor {
    pub fn new(asset_id: impl Into<String>, file_size_bytes: u64, format: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            file_name: String::new(),
            file_size_bytes,
            format: format.into(),
            media_type: None,
            duration_seconds: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    /// The declared media type, falling back to classifying `format`.
    pub fn resolved_media_type(&self) -> MediaType {
        self.media_type
            .unwrap_or_else(|| MediaType::from_format(&self.format))
    }
}

/// Asset facts carried along with a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub file_size_bytes: u64,
    pub duration_seconds: Option<f64>,
    pub format: String,
    pub media_type: MediaType,
    pub estimated_processing_minutes: u32,
}

/// A unit of work tracking a single asset through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: String,
    /// External media record being processed.
    pub asset_id: String,
    /// Display name of the asset.
    pub file_name: String,
    /// Current status.
    pub status: JobStatus,
    /// Current stage; meaningful only while processing.
    pub stage: Stage,
    /// Percent complete, 0..=100.
    pub progress: u8,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started processing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message; only set while the job is failed.
    pub error: Option<String>,
    /// Error of the most recent failed attempt, kept across automatic requeues.
    pub last_error: Option<String>,
    /// Number of automatic requeues so far.
    pub retry_count: u32,
    /// Upper bound for `retry_count`.
    pub max_retries: u32,
    pub metadata: JobMetadata,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Processing time of the last attempt, if it both started and finished.
    pub fn processing_minutes(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                let millis = (completed - started).num_milliseconds().max(0);
                Some(millis as f64 / 60_000.0)
            }
            _ => None,
        }
    }

    /// Reset to a fresh queued attempt, as done by an explicit retry.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = JobStatus::Queued;
        self.stage = Stage::Upload;
        self.progress = 0;
        self.error = None;
        self.last_error = None;
        self.retry_count = 0;
        self.started_at = None;
        self.completed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Upload < Stage::Validation);
        assert!(Stage::Validation < Stage::Transcription);
        assert!(Stage::Transcription < Stage::Analysis);
        assert!(Stage::Analysis < Stage::Summary);
        assert!(Stage::Summary < Stage::Completion);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_media_type_from_format() {
        assert_eq!(MediaType::from_format("video/mp4"), MediaType::Video);
        assert_eq!(MediaType::from_format("MOV"), MediaType::Video);
        assert_eq!(MediaType::from_format("call.webm"), MediaType::Video);
        assert_eq!(MediaType::from_format("audio/mpeg"), MediaType::Audio);
        assert_eq!(MediaType::from_format("wav"), MediaType::Audio);
        assert_eq!(MediaType::from_format(""), MediaType::Audio);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let stage: Stage = serde_json::from_str("\"analysis\"").unwrap();
        assert_eq!(stage, Stage::Analysis);
    }
}
