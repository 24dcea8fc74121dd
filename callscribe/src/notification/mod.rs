//! User-facing notifications.
//!
//! Sinks are fire-and-forget: `notify` never blocks the caller and never reports delivery
//! failures back to the pipeline.

mod webhook;

pub use webhook::{WebhookAuth, WebhookConfig, WebhookNotificationSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Queued,
    Completed,
    Failed,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// A notification about a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub job_id: String,
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// "Added to queue" notification sent on enqueue.
    pub fn queued(job_id: &str, asset_id: &str, file_name: &str, estimated_minutes: u32) -> Self {
        Self::new(
            NotificationKind::Queued,
            "Added to queue",
            format!(
                "{} will be processed shortly (about {} min)",
                file_name, estimated_minutes
            ),
            job_id,
            asset_id,
        )
    }

    pub fn completed(job_id: &str, asset_id: &str, file_name: &str) -> Self {
        Self::new(
            NotificationKind::Completed,
            "Processing complete",
            format!("{} has been transcribed and summarized", file_name),
            job_id,
            asset_id,
        )
    }

    pub fn failed(job_id: &str, asset_id: &str, file_name: &str, error: &str) -> Self {
        Self::new(
            NotificationKind::Failed,
            "Processing failed",
            format!("{}: {}", file_name, error),
            job_id,
            asset_id,
        )
    }

    fn new(
        kind: NotificationKind,
        title: &str,
        message: String,
        job_id: &str,
        asset_id: &str,
    ) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message,
            job_id: job_id.to_string(),
            asset_id: asset_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Failed => warn!(
                job_id = %notification.job_id,
                asset_id = %notification.asset_id,
                "{}: {}",
                notification.title,
                notification.message
            ),
            _ => info!(
                job_id = %notification.job_id,
                asset_id = %notification.asset_id,
                "{}: {}",
                notification.title,
                notification.message
            ),
        }
    }
}

/// Forwards every notification to each inner sink.
#[derive(Default, Clone)]
pub struct FanoutNotificationSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for FanoutNotificationSink {
    fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.notify(notification.clone());
        }
    }
}
