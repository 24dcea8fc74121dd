//! Collaborator doubles shared by the pipeline tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::pipeline::MediaType;
use crate::services::{
    AssetRecordUpdate, AssetSource, AssetStore, InMemoryAssetRegistry, InMemoryAssetStore,
    MediaFetcher, PipelineServices, SummarizationService, TranscriptionResult,
    TranscriptionService,
};
use crate::{Error, Result};

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub(crate) struct StaticFetcher;

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, location: &str) -> Result<Bytes> {
        if location.contains("unreachable") {
            return Err(Error::fetch("HTTP 404 Not Found fetching media"));
        }
        Ok(Bytes::from_static(b"RIFF....WAVEfmt "))
    }
}

#[derive(Default)]
pub(crate) struct ScriptedTranscriber {
    pub failures: AtomicU32,
    pub delay_ms: AtomicU64,
    pub calls: AtomicU32,
    in_flight: AtomicU32,
    peak: AtomicU32,
}

impl ScriptedTranscriber {
    pub fn fail_next(&self, times: u32) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent transcriptions observed.
    pub fn peak_concurrency(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionService for ScriptedTranscriber {
    async fn transcribe(&self, _media: Bytes, _source: &AssetSource) -> Result<TranscriptionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if take_one(&self.failures) {
            return Ok(TranscriptionResult::failure("audio could not be decoded"));
        }
        Ok(TranscriptionResult::success(
            "Thanks for calling, let's schedule the demo.",
            Some(95.0),
        ))
    }
}

#[derive(Default)]
pub(crate) struct ScriptedSummarizer {
    pub failures: AtomicU32,
}

#[async_trait]
impl SummarizationService for ScriptedSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        if take_one(&self.failures) {
            return Err(Error::summarization("model overloaded"));
        }
        Ok(format!("Summary of {} characters", transcript.len()))
    }
}

/// Records updates, failing the first `failures` writes.
#[derive(Default)]
pub(crate) struct FlakyAssetStore {
    pub records: InMemoryAssetStore,
    pub failures: AtomicU32,
}

#[async_trait]
impl AssetStore for FlakyAssetStore {
    async fn update_asset_record(&self, asset_id: &str, update: &AssetRecordUpdate) -> Result<()> {
        if take_one(&self.failures) {
            return Err(Error::persistence("HTTP 503 updating asset"));
        }
        self.records.update_asset_record(asset_id, update).await
    }
}

pub(crate) struct TestServices {
    pub registry: Arc<InMemoryAssetRegistry>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub summarizer: Arc<ScriptedSummarizer>,
    pub asset_store: Arc<FlakyAssetStore>,
}

impl TestServices {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(InMemoryAssetRegistry::new()),
            transcriber: Arc::new(ScriptedTranscriber::default()),
            summarizer: Arc::new(ScriptedSummarizer::default()),
            asset_store: Arc::new(FlakyAssetStore::default()),
        }
    }

    /// Register a fetchable source for the asset.
    pub fn register(&self, asset_id: &str) {
        self.registry.register(
            asset_id,
            AssetSource::new(format!("https://media.test/{}.wav", asset_id), MediaType::Audio),
        );
    }

    pub fn services(&self) -> PipelineServices {
        PipelineServices {
            resolver: self.registry.clone(),
            fetcher: Arc::new(StaticFetcher),
            transcriber: self.transcriber.clone(),
            summarizer: self.summarizer.clone(),
            asset_store: self.asset_store.clone(),
        }
    }
}
