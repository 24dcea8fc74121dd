//! Crate-wide error types.
//!
//! Pipeline failures render with a leading taxonomy token (`ValidationError: ...`,
//! `TranscriptionError: ...`) because the rendered message is what a failed job keeps in its
//! `error` field, and the statistics group failures by that token.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The asset has no retrievable source location.
    #[error("ValidationError: {0}")]
    Validation(String),

    /// Retrieving the media bytes failed.
    #[error("FetchError: {0}")]
    Fetch(String),

    /// The transcription service reported a failure or produced no transcript.
    #[error("TranscriptionError: {0}")]
    Transcription(String),

    #[error("SummarizationError: {0}")]
    Summarization(String),

    /// Writing to the asset record failed.
    #[error("PersistenceError: {0}")]
    Persistence(String),

    #[error("TimeoutError: job exceeded {0}s")]
    Timeout(u64),

    #[error("Cancelled: job {0} was cancelled")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UnknownError: {0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn transcription(msg: impl Into<String>) -> Self {
        Self::Transcription(msg.into())
    }

    pub fn summarization(msg: impl Into<String>) -> Self {
        Self::Summarization(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error came from a cancelled job rather than a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Fold errors outside the job taxonomy into `UnknownError` before they are stored on a job.
    pub fn into_job_error(self) -> Self {
        match self {
            Self::Validation(_)
            | Self::Fetch(_)
            | Self::Transcription(_)
            | Self::Summarization(_)
            | Self::Persistence(_)
            | Self::Timeout(_)
            | Self::Cancelled(_)
            | Self::Other(_) => self,
            other => Self::Other(other.to_string()),
        }
    }
}
