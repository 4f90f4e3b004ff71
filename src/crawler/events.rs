//! Ordered event stream for crawl runs
//!
//! The controller and its workers publish [`CrawlEvent`]s on a broadcast
//! channel. Publishing never blocks: with no subscribers the event is only
//! mirrored to `tracing`, and a lagging subscriber loses the oldest events
//! rather than stalling the crawl.

use crate::state::{RunState, StatsSnapshot, StopReason};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// One entry of the run log
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CrawlEvent {
    RunStarted {
        run_id: u64,
        domain: String,
        seed: String,
        concurrency: u32,
    },
    WorkerStarted {
        run_id: u64,
        worker: u32,
    },
    WorkerStopped {
        run_id: u64,
        worker: u32,
    },
    PageFetched {
        run_id: u64,
        url: String,
        final_url: String,
        depth: u32,
        links_queued: usize,
    },
    PageErrored {
        run_id: u64,
        url: String,
        status: String,
        detail: String,
        attempts: u32,
    },
    RetryScheduled {
        run_id: u64,
        url: String,
        attempt: u32,
        backoff_ms: u64,
    },
    FlushCompleted {
        run_id: u64,
        logged: usize,
        snapshotted: usize,
    },
    FlushFailed {
        run_id: u64,
        error: String,
        buffered: usize,
    },
    StateChanged {
        run_id: u64,
        from: RunState,
        to: RunState,
    },
    RunFinished {
        run_id: u64,
        state: RunState,
        stop_reason: Option<StopReason>,
        stats: StatsSnapshot,
    },
}

impl CrawlEvent {
    pub fn run_id(&self) -> u64 {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::WorkerStarted { run_id, .. }
            | Self::WorkerStopped { run_id, .. }
            | Self::PageFetched { run_id, .. }
            | Self::PageErrored { run_id, .. }
            | Self::RetryScheduled { run_id, .. }
            | Self::FlushCompleted { run_id, .. }
            | Self::FlushFailed { run_id, .. }
            | Self::StateChanged { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }

    fn log(&self) {
        match self {
            Self::RunStarted {
                run_id,
                domain,
                seed,
                concurrency,
            } => tracing::info!(
                "Run {} started for {} from {} with {} workers",
                run_id,
                domain,
                seed,
                concurrency
            ),
            Self::WorkerStarted { run_id, worker } => {
                tracing::debug!("Run {}: worker {} started", run_id, worker)
            }
            Self::WorkerStopped { run_id, worker } => {
                tracing::debug!("Run {}: worker {} stopped", run_id, worker)
            }
            Self::PageFetched {
                url, links_queued, ..
            } => tracing::info!("Fetched {} ({} new links)", url, links_queued),
            Self::PageErrored {
                url,
                status,
                detail,
                attempts,
                ..
            } => tracing::warn!(
                "Failed {} after {} attempts [{}]: {}",
                url,
                attempts,
                status,
                detail
            ),
            Self::RetryScheduled {
                url,
                attempt,
                backoff_ms,
                ..
            } => tracing::debug!("Retrying {} (attempt {}) in {}ms", url, attempt, backoff_ms),
            Self::FlushCompleted {
                logged,
                snapshotted,
                ..
            } => tracing::debug!(
                "Flush completed: {} logged, {} snapshotted",
                logged,
                snapshotted
            ),
            Self::FlushFailed {
                error, buffered, ..
            } => tracing::error!(
                "Flush failed, {} records held in memory: {}",
                buffered,
                error
            ),
            Self::StateChanged { run_id, from, to } => {
                tracing::info!("Run {}: {} -> {}", run_id, from, to)
            }
            Self::RunFinished {
                run_id,
                state,
                stats,
                ..
            } => tracing::info!(
                "Run {} finished ({}): {} fetched, {} errored, {} queued",
                run_id,
                state,
                stats.pages_fetched,
                stats.pages_errored,
                stats.pages_queued
            ),
        }
    }
}

/// Cloneable publishing handle for the event stream
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CrawlEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event; never blocks and never fails
    pub fn publish(&self, event: CrawlEvent) {
        event.log();
        // No receivers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
