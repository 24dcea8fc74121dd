//! HTTP implementations of the pipeline collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{
    AssetRecordUpdate, AssetSource, AssetStore, MediaFetcher, SummarizationService,
    TranscriptionResult, TranscriptionService,
};
use crate::{Error, Result};

const SUMMARY_PROMPT: &str = "You summarize recorded sales and support calls. Write a short \
summary covering the purpose of the call, the key points discussed, and any agreed next steps.";

/// Endpoint of an OpenAI-compatible service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpointConfig {
    /// Full endpoint URL.
    pub url: String,
    /// Bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
}

fn default_service_timeout() -> u64 {
    300
}

impl ServiceEndpointConfig {
    pub fn transcription_default() -> Self {
        Self {
            url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            timeout_secs: default_service_timeout(),
        }
    }

    pub fn summarization_default() -> Self {
        Self {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Asset record API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetStoreConfig {
    /// Base URL; records live under `{base_url}/assets/{asset_id}`.
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_store_timeout() -> u64 {
    30
}

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

fn with_auth(req: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => req.bearer_auth(key),
        None => req,
    }
}

/// Downloads media over HTTP(S).
pub struct HttpMediaFetcher {
    client: Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: build_client(timeout_secs),
        }
    }
}

impl Default for HttpMediaFetcher {
    fn default() -> Self {
        Self::new(600)
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, location: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("HTTP {} fetching media", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(format!("reading body failed: {}", e)))?;
        debug!(size = bytes.len(), "Fetched media");
        Ok(bytes)
    }
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct HttpTranscriptionService {
    config: ServiceEndpointConfig,
    client: Client,
}

impl HttpTranscriptionService {
    pub fn new(config: ServiceEndpointConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn transcribe(&self, media: Bytes, source: &AssetSource) -> Result<TranscriptionResult> {
        let file_name = source
            .file_name
            .clone()
            .unwrap_or_else(|| "recording".to_string());

        let part = reqwest::multipart::Part::bytes(media.to_vec())
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| Error::transcription(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");

        let req = with_auth(
            self.client.post(&self.config.url).multipart(form),
            self.config.api_key.as_deref(),
        );
        let response = req
            .send()
            .await
            .map_err(|e| Error::transcription(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(TranscriptionResult::failure(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::transcription(format!("invalid response: {}", e)))?;
        Ok(parse_transcription_response(&json))
    }
}

fn parse_transcription_response(json: &Value) -> TranscriptionResult {
    let text = json
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return TranscriptionResult::failure("response contained no transcript");
    }
    let duration = json.get("duration").and_then(Value::as_f64);
    TranscriptionResult::success(text, duration)
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpSummarizationService {
    config: ServiceEndpointConfig,
    client: Client,
}

impl HttpSummarizationService {
    pub fn new(config: ServiceEndpointConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }
}

#[async_trait]
impl SummarizationService for HttpSummarizationService {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SUMMARY_PROMPT },
                { "role": "user", "content": transcript },
            ],
        });

        let req = with_auth(
            self.client.post(&self.config.url).json(&body),
            self.config.api_key.as_deref(),
        );
        let response = req
            .send()
            .await
            .map_err(|e| Error::summarization(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::summarization(format!("API error {}: {}", status, body)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::summarization(format!("invalid response: {}", e)))?;
        parse_chat_completion(&json)
            .ok_or_else(|| Error::summarization("response contained no summary"))
    }
}

fn parse_chat_completion(json: &Value) -> Option<String> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Writes asset records through a JSON API.
pub struct HttpAssetStore {
    config: AssetStoreConfig,
    client: Client,
}

impl HttpAssetStore {
    pub fn new(config: AssetStoreConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn update_asset_record(&self, asset_id: &str, update: &AssetRecordUpdate) -> Result<()> {
        let url = asset_record_url(&self.config.base_url, asset_id);
        let req = with_auth(
            self.client.patch(&url).json(update),
            self.config.api_key.as_deref(),
        );
        let response = req
            .send()
            .await
            .map_err(|e| Error::persistence(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::persistence(format!(
                "HTTP {} updating asset {}",
                status, asset_id
            )));
        }
        debug!(asset_id, status = ?update.status, "Asset record updated");
        Ok(())
    }
}

fn asset_record_url(base_url: &str, asset_id: &str) -> String {
    format!("{}/assets/{}", base_url.trim().trim_end_matches('/'), asset_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcription_response() {
        let result = parse_transcription_response(&json!({ "text": " hi there ", "duration": 42.5 }));
        assert!(result.success);
        assert_eq!(result.transcript.as_deref(), Some("hi there"));
        assert_eq!(result.duration_seconds, Some(42.5));
    }

    #[test]
    fn test_parse_transcription_response_without_text_is_failure() {
        let result = parse_transcription_response(&json!({ "text": "   " }));
        assert!(!result.success);
        assert!(result.transcript.is_none());
        assert!(result.error.is_some());

        assert!(!parse_transcription_response(&json!({})).success);
    }

    #[test]
    fn test_parse_chat_completion() {
        let json = json!({ "choices": [ { "message": { "role": "assistant", "content": "Short call." } } ] });
        assert_eq!(parse_chat_completion(&json).as_deref(), Some("Short call."));
        assert!(parse_chat_completion(&json!({ "choices": [] })).is_none());
    }

    #[test]
    fn test_asset_record_url() {
        assert_eq!(
            asset_record_url("https://api.example.com/v1/", "a-1"),
            "https://api.example.com/v1/assets/a-1"
        );
    }

    #[test]
    fn test_endpoint_defaults() {
        let config = ServiceEndpointConfig::transcription_default();
        assert!(config.url.ends_with("/audio/transcriptions"));
        assert_eq!(config.timeout_secs, 300);
        assert!(ServiceEndpointConfig::summarization_default().url.ends_with("/chat/completions"));
    }
}
