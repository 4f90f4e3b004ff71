//! Buffered result sink
//!
//! Workers hand finished records to [`ResultSink::accept`]. A background
//! flusher drains the buffer on a fixed interval, or as soon as the buffer
//! reaches `flush-every-items`, and persists it in two steps:
//!
//! 1. append every record as one line to `pages.ndjson`
//! 2. rewrite `pages.json` (all records so far) via a temp file + rename
//!
//! Records that made it into the log but not yet into the snapshot wait in
//! a pending list, so a snapshot retry never duplicates log lines. A record
//! is always in the buffer, in the pending list, or on disk.

use crate::config::OutputConfig;
use crate::crawler::{CrawlEvent, EventBus};
use crate::output::record::PageResult;
use crate::output::{SinkError, SinkResult};
use crate::state::CrawlStats;
use serde_json::Value;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Append-only log, one JSON record per line
pub const LOG_FILE_NAME: &str = "pages.ndjson";
/// Rolling snapshot, a JSON array of every record
pub const SNAPSHOT_FILE_NAME: &str = "pages.json";

/// What a single flush persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records appended to the log
    pub logged: usize,
    /// Records added to the snapshot
    pub snapshotted: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.logged == 0 && self.snapshotted == 0
    }
}

#[derive(Debug, Default)]
struct Buffers {
    buffer: Vec<PageResult>,
    pending_snapshot: Vec<PageResult>,
}

/// Thread-safe buffer in front of the two output artifacts of a domain
pub struct ResultSink {
    log_path: PathBuf,
    snapshot_path: PathBuf,
    snapshot_tmp_path: PathBuf,
    buffers: Mutex<Buffers>,
    flush_lock: tokio::sync::Mutex<()>,
    flush_wanted: Notify,
    flush_every_items: usize,
    retry_attempts: u32,
    retry_backoff: Duration,
    degraded: AtomicBool,
    accepted: AtomicU64,
}

impl ResultSink {
    /// Opens (creating if needed) the artifacts under `dir`
    ///
    /// With `fresh`, existing artifacts are truncated; otherwise new records
    /// are appended to what previous runs left behind.
    pub async fn open(dir: &Path, config: &OutputConfig, fresh: bool) -> SinkResult<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let log_path = dir.join(LOG_FILE_NAME);
        let snapshot_path = dir.join(SNAPSHOT_FILE_NAME);
        let snapshot_tmp_path = dir.join(format!("{}.tmp", SNAPSHOT_FILE_NAME));

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if fresh {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        options.open(&log_path).await?;

        if fresh {
            remove_if_exists(&snapshot_path).await?;
        }
        // Leftover from a flush that was interrupted before its rename
        remove_if_exists(&snapshot_tmp_path).await?;

        tracing::debug!("Result sink opened at {}", dir.display());

        Ok(Self {
            log_path,
            snapshot_path,
            snapshot_tmp_path,
            buffers: Mutex::new(Buffers::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_wanted: Notify::new(),
            flush_every_items: config.flush_every_items.max(1),
            retry_attempts: config.flush_retry_attempts,
            retry_backoff: Duration::from_millis(config.flush_retry_backoff_ms),
            degraded: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
        })
    }

    /// Buffers a record; wakes the flusher once the size threshold is reached
    pub fn accept(&self, result: PageResult) {
        let buffered = {
            let mut buffers = self.lock_buffers();
            buffers.buffer.push(result);
            buffers.buffer.len()
        };
        self.accepted.fetch_add(1, Ordering::AcqRel);

        if buffered >= self.flush_every_items {
            self.flush_wanted.notify_one();
        }
    }

    /// Records held in memory (not yet in both artifacts)
    pub fn buffered(&self) -> usize {
        let buffers = self.lock_buffers();
        buffers.buffer.len() + buffers.pending_snapshot.len()
    }

    /// Total records accepted since the sink was opened
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Acquire)
    }

    /// True while the last flush failed after all its retries
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Persists everything buffered so far
    ///
    /// I/O failures are retried with doubling backoff. When they persist the
    /// records stay in memory, the sink is marked degraded and the error is
    /// returned; the next flush tries again.
    pub async fn flush(&self) -> SinkResult<FlushReport> {
        let _guard = self.flush_lock.lock().await;
        let mut report = FlushReport::default();

        let batch = std::mem::take(&mut self.lock_buffers().buffer);
        if !batch.is_empty() {
            let appended = {
                let batch = &batch;
                self.retrying("append to log", move || self.append_log(batch))
                    .await
            };

            if let Err(e) = appended {
                let mut buffers = self.lock_buffers();
                let newer = std::mem::replace(&mut buffers.buffer, batch);
                buffers.buffer.extend(newer);
                self.degraded.store(true, Ordering::Release);
                return Err(e);
            }

            report.logged = batch.len();
            self.lock_buffers().pending_snapshot.extend(batch);
        }

        let pending = std::mem::take(&mut self.lock_buffers().pending_snapshot);
        if pending.is_empty() {
            self.degraded.store(false, Ordering::Release);
            return Ok(report);
        }

        let written = {
            let pending = &pending;
            self.retrying("write snapshot", move || self.write_snapshot(pending))
                .await
        };

        match written {
            Ok(()) => {
                report.snapshotted = pending.len();
                self.degraded.store(false, Ordering::Release);
                tracing::debug!(
                    "Flushed {} records to {} and {}",
                    report.logged,
                    self.log_path.display(),
                    self.snapshot_path.display()
                );
                Ok(report)
            }
            Err(e) => {
                let mut buffers = self.lock_buffers();
                let newer = std::mem::replace(&mut buffers.pending_snapshot, pending);
                buffers.pending_snapshot.extend(newer);
                self.degraded.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Flushes and publishes the outcome on the event stream
    pub async fn flush_and_report(
        &self,
        run_id: u64,
        events: &EventBus,
        stats: &CrawlStats,
    ) -> SinkResult<FlushReport> {
        match self.flush().await {
            Ok(report) => {
                if !report.is_empty() {
                    stats.record_flush();
                    events.publish(CrawlEvent::FlushCompleted {
                        run_id,
                        logged: report.logged,
                        snapshotted: report.snapshotted,
                    });
                }
                Ok(report)
            }
            Err(e) => {
                events.publish(CrawlEvent::FlushFailed {
                    run_id,
                    error: e.to_string(),
                    buffered: self.buffered(),
                });
                Err(e)
            }
        }
    }

    /// Spawns the periodic flusher; it exits when `shutdown` is cancelled
    ///
    /// The final flush is left to the caller so it can happen after the
    /// last worker has handed over its record.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        interval: Duration,
        run_id: u64,
        events: EventBus,
        stats: Arc<CrawlStats>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let sink = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = sink.flush_wanted.notified() => {}
                }

                // Errors are already published and the records kept
                let _ = sink.flush_and_report(run_id, &events, &stats).await;
            }

            tracing::trace!("Flusher for run {} exiting", run_id);
        })
    }

    fn lock_buffers(&self) -> MutexGuard<'_, Buffers> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn retrying<F, Fut>(&self, what: &str, mut op: F) -> SinkResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SinkResult<()>>,
    {
        let mut backoff = self.retry_backoff;
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        "Failed to {} (attempt {}), retrying in {:?}: {}",
                        what,
                        attempt,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!("Failed to {} after {} attempts: {}", what, attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }

    async fn append_log(&self, batch: &[PageResult]) -> SinkResult<()> {
        let mut payload = Vec::with_capacity(batch.len() * 512);
        for record in batch {
            serde_json::to_writer(&mut payload, record)?;
            payload.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        let original_len = file.metadata().await?.len();

        let written = match file.write_all(&payload).await {
            Ok(()) => file.sync_data().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            // Roll back a partial append so the retry does not duplicate lines
            if let Err(truncate_err) = file.set_len(original_len).await {
                tracing::warn!("Could not roll back partial log append: {}", truncate_err);
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn write_snapshot(&self, pending: &[PageResult]) -> SinkResult<()> {
        let records = match self.read_snapshot().await {
            Ok(mut existing) => {
                for record in pending {
                    existing.push(serde_json::to_value(record)?);
                }
                existing
            }
            Err(SinkError::Json(e)) => {
                // The log already holds the pending records
                tracing::warn!(
                    "Snapshot {} is unreadable ({}), rebuilding it from {}",
                    self.snapshot_path.display(),
                    e,
                    self.log_path.display()
                );
                self.read_log().await?
            }
            Err(e) => return Err(e),
        };

        let payload = serde_json::to_vec_pretty(&records)?;

        let mut tmp = tokio::fs::File::create(&self.snapshot_tmp_path).await?;
        tmp.write_all(&payload).await?;
        tmp.sync_all().await?;
        drop(tmp);

        tokio::fs::rename(&self.snapshot_tmp_path, &self.snapshot_path).await?;
        Ok(())
    }

    async fn read_snapshot(&self) -> SinkResult<Vec<Value>> {
        match tokio::fs::read(&self.snapshot_path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_log(&self) -> SinkResult<Vec<Value>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;
        let mut records = Vec::new();

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => records.push(value),
                Err(e) => tracing::warn!(
                    "Skipping unreadable line {} of {}: {}",
                    index + 1,
                    self.log_path.display(),
                    e
                ),
            }
        }

        Ok(records)
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
