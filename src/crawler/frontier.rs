//! Crawl frontier: FIFO queue of pending URLs behind a seen-set guard
//!
//! Every URL that is ever enqueued is remembered for the rest of the run, so
//! each distinct normalized URL is handed to exactly one worker. The check
//! and the insert happen under the same lock.
//!
//! Workers call [`Frontier::task_done`] once they finished an entry (after
//! enqueueing its children), usually through the [`TaskGuard`] returned by
//! [`Frontier::task_guard`] so an unwinding worker still releases its slot. The frontier is drained when the queue is empty
//! and no entry is in flight; from then on [`Frontier::dequeue`] returns
//! `None` to every caller.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: Url,

    /// Hops from the seed (seeds are depth 0)
    pub depth: u32,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<FrontierEntry>,
    seen: HashSet<String>,
    in_flight: usize,
    closed: bool,
}

/// Shared work queue for the worker pool
#[derive(Debug, Default)]
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `url` unless it was seen before or the frontier is closed
    ///
    /// Returns true when the URL was queued.
    pub fn enqueue(&self, url: Url, depth: u32) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed || !inner.seen.insert(url.as_str().to_string()) {
                return false;
            }
            inner.queue.push_back(FrontierEntry { url, depth });
        }

        self.notify.notify_one();
        true
    }

    /// Records a URL as seen without queueing it
    ///
    /// Used for redirect targets so the page is not fetched a second time
    /// under its final address. Returns false if it was already seen.
    pub fn mark_visited(&self, url: &Url) -> bool {
        self.lock().seen.insert(url.as_str().to_string())
    }

    /// Waits for the next entry
    ///
    /// Returns `None` once the frontier is closed, or drained: nothing queued
    /// and nothing in flight that could still enqueue more.
    pub async fn dequeue(&self) -> Option<FrontierEntry> {
        loop {
            // Register interest before looking at the queue so a wakeup
            // between the check and the await is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(entry) = inner.queue.pop_front() {
                    inner.in_flight += 1;
                    return Some(entry);
                }
                if inner.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks one dequeued entry as finished
    pub fn task_done(&self) {
        let drained = {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
            inner.in_flight == 0 && inner.queue.is_empty()
        };

        if drained {
            tracing::debug!("Frontier drained");
            self.notify.notify_waiters();
        }
    }

    /// Calls [`Frontier::task_done`] when the returned guard is dropped
    pub fn task_guard(&self) -> TaskGuard<'_> {
        TaskGuard(self)
    }

    /// Stops handing out entries; queued entries are abandoned
    pub fn close(&self) {
        let was_open = {
            let mut inner = self.lock();
            !std::mem::replace(&mut inner.closed, true)
        };

        if was_open {
            tracing::debug!("Frontier closed");
            self.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Entries waiting in the queue
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Distinct URLs seen during the run
    pub fn seen_count(&self) -> usize {
        self.lock().seen.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Marks one dequeued entry finished on drop, including during a panic
#[must_use = "dropping the guard immediately finishes the entry"]
pub struct TaskGuard<'a>(&'a Frontier);

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}
