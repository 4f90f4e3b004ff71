//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `RunState`: lifecycle of one crawl run (idle, running, stopping, ...)
//! - `CrawlStats`: atomic per-run counters shared by all workers
//! - `RunStatus`: the snapshot handed to callers asking about a run

mod run_state;
mod stats;

// Re-export main types
pub use run_state::{RunState, RunStatus, StopReason};
pub use stats::{CrawlStats, StatsSnapshot};
