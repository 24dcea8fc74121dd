//! External collaborators consumed by the pipeline.
//!
//! The pipeline only depends on the traits defined here. HTTP implementations talk to hosted
//! services; the in-memory implementations back tests and dry runs.

mod http;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Result;
use crate::pipeline::MediaType;

pub use http::{
    AssetStoreConfig, HttpAssetStore, HttpMediaFetcher, HttpSummarizationService,
    HttpTranscriptionService, ServiceEndpointConfig,
};
pub use memory::{InMemoryAssetRegistry, InMemoryAssetStore};

/// Where an asset's media can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSource {
    /// Fetchable location (usually a signed storage URL).
    pub location: String,
    pub media_type: MediaType,
    /// File name sent along with the media, if known.
    #[serde(default)]
    pub file_name: Option<String>,
}

impl AssetSource {
    pub fn new(location: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            location: location.into(),
            media_type,
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// What the transcription service reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub success: bool,
    pub transcript: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
}

impl TranscriptionResult {
    pub fn success(transcript: impl Into<String>, duration_seconds: Option<f64>) -> Self {
        Self {
            success: true,
            transcript: Some(transcript.into()),
            duration_seconds,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            transcript: None,
            duration_seconds: None,
            error: Some(error.into()),
        }
    }
}

/// Status written to the external asset record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetRecordStatus {
    Completed,
    Failed,
}

/// Fields written to the external asset record.
///
/// A failure update carries only `status` and `updated_at`; writing it twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecordUpdate {
    pub status: AssetRecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Media duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRecordUpdate {
    pub fn completed(
        transcript: impl Into<String>,
        summary: impl Into<String>,
        duration: Option<f64>,
    ) -> Self {
        Self {
            status: AssetRecordStatus::Completed,
            transcript: Some(transcript.into()),
            summary: Some(summary.into()),
            duration,
            updated_at: Utc::now(),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: AssetRecordStatus::Failed,
            transcript: None,
            summary: None,
            duration: None,
            updated_at: Utc::now(),
        }
    }
}

/// Resolves an asset id to a fetchable source.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    /// `Ok(None)` means the asset has no retrievable source.
    async fn resolve(&self, asset_id: &str) -> Result<Option<AssetSource>>;
}

/// Retrieves media bytes from a storage location.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Bytes>;
}

/// Speech-to-text service.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, media: Bytes, source: &AssetSource) -> Result<TranscriptionResult>;
}

/// Produces a summary of a transcript.
#[async_trait]
pub trait SummarizationService: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

/// Writes pipeline results to the external asset record.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn update_asset_record(&self, asset_id: &str, update: &AssetRecordUpdate) -> Result<()>;
}

/// The collaborators a pipeline executor calls into.
#[derive(Clone)]
pub struct PipelineServices {
    pub resolver: Arc<dyn AssetResolver>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub transcriber: Arc<dyn TranscriptionService>,
    pub summarizer: Arc<dyn SummarizationService>,
    pub asset_store: Arc<dyn AssetStore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_update_serializes_status_only() {
        let json = serde_json::to_value(AssetRecordUpdate::failed()).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json.get("transcript").is_none());
        assert!(json.get("summary").is_none());
        assert!(json.get("updated_at").is_some());
    }

    #[test]
    fn test_completed_update_carries_results() {
        let update = AssetRecordUpdate::completed("hello", "greeting", Some(12.5));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["transcript"], "hello");
        assert_eq!(json["summary"], "greeting");
        assert_eq!(json["duration"], 12.5);
    }
}
