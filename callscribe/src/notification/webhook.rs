//! Webhook notification sink.

use reqwest::{Client, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{Notification, NotificationSink};
use crate::{Error, Result};

/// Webhook sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Whether the sink is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Webhook URL.
    pub url: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Authentication type.
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

/// Webhook authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebhookAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            headers: Vec::new(),
            auth: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Posts notifications as JSON to a URL.
#[derive(Clone)]
pub struct WebhookNotificationSink {
    config: WebhookConfig,
    client: Client,
}

impl WebhookNotificationSink {
    pub fn new(config: WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, value);
            }
        }

        match &self.config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                if let Ok(value) = format!("Bearer {}", token).parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            Some(WebhookAuth::Header { name, value }) => {
                if let (Ok(name), Ok(value)) = (
                    name.parse::<reqwest::header::HeaderName>(),
                    value.parse::<reqwest::header::HeaderValue>(),
                ) {
                    headers.insert(name, value);
                }
            }
            // Basic auth goes through the request builder.
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        headers
    }

    fn build_payload(&self, notification: &Notification) -> serde_json::Value {
        json!({
            "event_type": notification.kind.to_string(),
            "title": notification.title,
            "message": notification.message,
            "job_id": notification.job_id,
            "asset_id": notification.asset_id,
            "timestamp": notification.timestamp.to_rfc3339(),
        })
    }

    /// Send one notification and wait for the response.
    pub async fn deliver(&self, notification: &Notification) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut request = self
            .client
            .post(&self.config.url)
            .headers(self.build_headers())
            .json(&self.build_payload(notification));

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Other(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Other(format!("Webhook failed: {} - {}", status, body)));
        }

        debug!("Webhook notification sent: {}", notification.kind);
        Ok(())
    }
}

impl NotificationSink for WebhookNotificationSink {
    fn notify(&self, notification: Notification) {
        if !self.is_enabled() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, dropping webhook notification");
            return;
        };

        let sink = self.clone();
        handle.spawn(async move {
            if let Err(e) = sink.deliver(&notification).await {
                warn!(job_id = %notification.job_id, error = %e, "Webhook notification failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_config_default() {
        let config = WebhookConfig::default();
        assert!(!config.enabled);
        assert!(config.url.is_empty());
        assert_eq!(config.timeout_secs, 10);
    }

    #[test]
    fn test_deserialized_config_is_enabled_by_default() {
        let config: WebhookConfig =
            serde_json::from_str(r#"{ "url": "https://example.com/hook" }"#).unwrap();
        assert!(WebhookNotificationSink::new(config).is_enabled());
        assert!(!WebhookNotificationSink::new(WebhookConfig::default()).is_enabled());
    }

    #[test]
    fn test_build_payload() {
        let sink = WebhookNotificationSink::new(WebhookConfig::default());
        let payload = sink.build_payload(&Notification::completed("j1", "a1", "call.wav"));

        assert_eq!(payload["event_type"], "completed");
        assert_eq!(payload["job_id"], "j1");
        assert_eq!(payload["asset_id"], "a1");
    }

    #[test]
    fn test_build_headers_with_bearer() {
        let sink = WebhookNotificationSink::new(WebhookConfig {
            enabled: true,
            url: "https://example.com/webhook".to_string(),
            auth: Some(WebhookAuth::Bearer {
                token: "test-token".to_string(),
            }),
            ..Default::default()
        });

        assert!(sink.build_headers().contains_key(reqwest::header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_disabled_sink_delivers_nothing() {
        let sink = WebhookNotificationSink::new(WebhookConfig::default());
        assert!(sink.deliver(&Notification::completed("j1", "a1", "x")).await.is_ok());
    }
}
