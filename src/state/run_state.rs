//! Run lifecycle definitions
//!
//! A run moves `Idle -> Running -> Stopping -> Stopped`, or
//! `Running -> Completed` when the frontier drains, or into `Failed` when the
//! renderer cannot serve any fetch.

use crate::state::stats::StatsSnapshot;
use serde::Serialize;
use std::fmt;

/// Represents the current state of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, workers not yet spawned
    Idle,

    /// Workers are draining the frontier
    Running,

    /// Stop requested; in-flight fetches are finishing
    Stopping,

    // ===== Terminal States =====
    /// Stopped before the frontier drained
    Stopped,

    /// Frontier drained and every worker exited
    Completed,

    /// Aborted by a run-level error
    Failed,
}

impl RunState {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }

    /// Returns true while workers may still be fetching
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    /// Checks whether moving from `self` to `to` is a legal transition
    pub fn can_transition_to(&self, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Idle, Failed)
                | (Running, Stopping)
                | (Running, Completed)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run left the `Running` state early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop_crawl` was called (or the process got Ctrl-C)
    Requested,
    /// `max_pages` fetches were started
    PageLimit,
}

/// Point-in-time view of a run, as reported to callers
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: u64,
    pub domain: String,
    pub state: RunState,
    pub stats: StatsSnapshot,
    pub stop_reason: Option<StopReason>,

    /// Flushing to disk keeps failing; results are held in memory
    pub degraded: bool,

    /// Run-level error that moved the run to `Failed`
    pub error: Option<String>,
}
