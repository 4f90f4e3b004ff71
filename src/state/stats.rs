//! Per-run counters shared by the workers and the controller
//!
//! Counters are plain atomics; a fetch slot is reserved with a
//! compare-and-swap so `max_pages` is never overshot by racing workers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Live counters for one run
#[derive(Debug)]
pub struct CrawlStats {
    pages_fetched: AtomicU64,
    pages_errored: AtomicU64,
    pages_queued: AtomicU64,
    fetches_started: AtomicU64,
    retries: AtomicU64,
    flushes: AtomicU64,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

/// Copy of the counters at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub pages_fetched: u64,
    pub pages_errored: u64,
    pub pages_queued: u64,
    pub fetches_started: u64,
    pub retries: u64,
    pub flushes: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self {
            pages_fetched: AtomicU64::new(0),
            pages_errored: AtomicU64::new(0),
            pages_queued: AtomicU64::new(0),
            fetches_started: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
        }
    }

    /// Reserves one fetch against the optional page cap
    ///
    /// Returns false once `limit` fetches have been started; the caller must
    /// not fetch in that case.
    pub fn try_begin_fetch(&self, limit: Option<u64>) -> bool {
        match limit {
            None => {
                self.fetches_started.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(limit) => self
                .fetches_started
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |started| {
                    (started < limit).then_some(started + 1)
                })
                .is_ok(),
        }
    }

    pub fn record_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_errored(&self) {
        self.pages_errored.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_queued(&self, count: u64) {
        self.pages_queued.fetch_add(count, Ordering::AcqRel);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::AcqRel);
    }

    pub fn mark_finished(&self) {
        let mut finished = self
            .finished_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        finished.get_or_insert_with(Utc::now);
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched.load(Ordering::Acquire)
    }

    pub fn fetches_started(&self) -> u64 {
        self.fetches_started.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let finished_at = *self
            .finished_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        StatsSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Acquire),
            pages_errored: self.pages_errored.load(Ordering::Acquire),
            pages_queued: self.pages_queued.load(Ordering::Acquire),
            fetches_started: self.fetches_started.load(Ordering::Acquire),
            retries: self.retries.load(Ordering::Acquire),
            flushes: self.flushes.load(Ordering::Acquire),
            started_at: Some(self.started_at),
            finished_at,
        }
    }
}

impl Default for CrawlStats {
    fn default() -> Self {
        Self::new()
    }
}
