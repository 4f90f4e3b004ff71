//! Output module for persisting crawl results
//!
//! This module handles:
//! - The `PageResult` record schema shared by both artifacts
//! - Buffering results in memory and flushing them to disk
//! - The append-only NDJSON log and the rolling JSON snapshot

mod record;
mod sink;

pub use record::{PageResult, PageStatus};
pub use sink::{FlushReport, ResultSink, LOG_FILE_NAME, SNAPSHOT_FILE_NAME};

use thiserror::Error;

/// Errors that can occur while flushing results
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for output operations
pub type SinkResult<T> = Result<T, SinkError>;
