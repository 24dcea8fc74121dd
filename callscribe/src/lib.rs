//! callscribe: turns uploaded call recordings into transcripts and summaries.
//!
//! Uploaded assets are queued as jobs, run through validation, transcription, analysis and
//! summary stages by a bounded worker pool, and their results written back to the asset
//! record. Queue and processing statistics are recomputed after every change.

pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod pipeline;
pub mod services;

pub use error::{Error, Result};
