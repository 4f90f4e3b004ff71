//! Crawl controller - run lifecycle and registry
//!
//! The controller starts runs, tracks their state and hands out status
//! snapshots. Each run owns its frontier, sink, counters and cancellation
//! token; the controller only keeps a registry of runs by id and of the
//! output directories currently being written.
//!
//! Lifecycle of one run:
//! 1. Validate the configuration and claim `<output-dir>/<domain>`
//! 2. Open the result sink and seed the frontier
//! 3. Spawn the flusher and `concurrency` workers
//! 4. Wait for every worker to exit, then force a final flush
//! 5. Release the output directory and enter a terminal state

use crate::config::{validate, Config};
use crate::crawler::events::{CrawlEvent, EventBus};
use crate::crawler::extractor::extract_sitemap_locs;
use crate::crawler::frontier::Frontier;
use crate::crawler::renderer::{HttpRenderer, PageRenderer};
use crate::crawler::worker::{run_worker, WorkerContext};
use crate::output::{FlushReport, ResultSink, SinkError};
use crate::state::{CrawlStats, RunState, RunStatus, StopReason};
use crate::url::{normalize, UrlFilter};
use crate::{ConfigError, StartError};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Identifies one crawl run within a controller
pub type RunId = u64;

/// Options that apply to a single start request
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Truncate the domain's output artifacts before crawling
    pub fresh: bool,
}

#[derive(Debug, Default)]
struct RunOutcome {
    stop_reason: Option<StopReason>,
    error: Option<String>,
}

/// Shared state of one run, owned jointly by the controller and the run task
pub(crate) struct RunControl {
    pub(crate) run_id: RunId,
    pub(crate) domain: String,
    pub(crate) frontier: Frontier,
    pub(crate) sink: Arc<ResultSink>,
    pub(crate) stats: Arc<CrawlStats>,
    pub(crate) events: EventBus,
    pub(crate) cancel: CancellationToken,
    state: watch::Sender<RunState>,
    outcome: Mutex<RunOutcome>,
}

impl RunControl {
    fn new(run_id: RunId, domain: String, sink: Arc<ResultSink>, events: EventBus) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            run_id,
            domain,
            frontier: Frontier::new(),
            sink,
            stats: Arc::new(CrawlStats::new()),
            events,
            cancel: CancellationToken::new(),
            state,
            outcome: Mutex::new(RunOutcome::default()),
        }
    }

    pub(crate) fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Moves to `to` if the transition is legal; publishes `StateChanged`
    fn transition(&self, to: RunState) -> bool {
        let mut from = None;
        self.state.send_if_modified(|state| {
            if state.can_transition_to(to) {
                from = Some(*state);
                *state = to;
                true
            } else {
                false
            }
        });

        match from {
            Some(from) => {
                self.events.publish(CrawlEvent::StateChanged {
                    run_id: self.run_id,
                    from,
                    to,
                });
                true
            }
            None => false,
        }
    }

    /// Stops handing out frontier entries
    ///
    /// A requested stop also cancels in-flight fetches (after their grace
    /// period); reaching the page limit lets them finish.
    pub(crate) fn request_stop(&self, reason: StopReason) {
        if self.transition(RunState::Stopping) {
            self.lock_outcome().stop_reason.get_or_insert(reason);
            tracing::info!("Stopping run {} ({:?})", self.run_id, reason);
        }

        self.frontier.close();
        if reason == StopReason::Requested {
            self.cancel.cancel();
        }
    }

    /// Aborts the run with a run-level error; it ends in `Failed`
    pub(crate) fn fail(&self, error: String) {
        {
            let mut outcome = self.lock_outcome();
            if outcome.error.is_some() {
                return;
            }
            tracing::error!("Run {} failed: {}", self.run_id, error);
            outcome.error = Some(error);
        }

        self.transition(RunState::Stopping);
        self.frontier.close();
        self.cancel.cancel();
    }

    /// Enters the terminal state matching how the run ended
    fn finish(&self) {
        let failed = self.lock_outcome().error.is_some();
        let terminal = match self.state() {
            _ if failed => RunState::Failed,
            RunState::Stopping => RunState::Stopped,
            _ => RunState::Completed,
        };

        self.stats.mark_finished();
        self.transition(terminal);

        let stop_reason = self.lock_outcome().stop_reason;
        self.events.publish(CrawlEvent::RunFinished {
            run_id: self.run_id,
            state: self.state(),
            stop_reason,
            stats: self.stats.snapshot(),
        });
    }

    pub(crate) fn status(&self) -> RunStatus {
        let outcome = self.lock_outcome();
        RunStatus {
            run_id: self.run_id,
            domain: self.domain.clone(),
            state: self.state(),
            stats: self.stats.snapshot(),
            stop_reason: outcome.stop_reason,
            degraded: self.sink.is_degraded(),
            error: outcome.error.clone(),
        }
    }

    fn lock_outcome(&self) -> MutexGuard<'_, RunOutcome> {
        self.outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Starts, stops and reports on crawl runs
///
/// Only one run may write a given `<output-dir>/<domain>` at a time; a
/// second start for the same directory fails with
/// [`StartError::AlreadyRunning`] until the first run is terminal.
pub struct CrawlController {
    renderer: Option<Arc<dyn PageRenderer>>,
    events: EventBus,
    next_run_id: AtomicU64,
    runs: Mutex<HashMap<RunId, Arc<RunControl>>>,
    active: Arc<Mutex<HashMap<PathBuf, RunId>>>,
}

impl CrawlController {
    /// Controller that renders pages with an [`HttpRenderer`] per run
    pub fn new() -> Self {
        Self {
            renderer: None,
            events: EventBus::default(),
            next_run_id: AtomicU64::new(1),
            runs: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Controller that uses `renderer` for every run
    pub fn with_renderer(renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
            ..Self::new()
        }
    }

    /// Subscribes to the event stream of every run started by this controller
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CrawlEvent> {
        self.events.subscribe()
    }

    /// Starts a crawl, appending to existing output
    pub async fn start_crawl(&self, config: Config) -> Result<RunId, StartError> {
        self.start_crawl_with(config, StartOptions::default()).await
    }

    /// Starts a crawl run and returns immediately with its id
    ///
    /// Fails without side effects when the configuration is invalid or
    /// another run is writing the same output directory.
    pub async fn start_crawl_with(
        &self,
        mut config: Config,
        options: StartOptions,
    ) -> Result<RunId, StartError> {
        config.crawl.domain = config.crawl.domain.trim().to_lowercase();
        validate(&config)?;

        let filter = UrlFilter::new(&config.crawl);
        let seed_raw = config.crawl.seed_url();
        let seed = normalize(&seed_raw, None)
            .filter(|url| filter.on_domain(url))
            .ok_or_else(|| {
                ConfigError::InvalidUrl(format!(
                    "Seed URL '{}' is not a crawlable URL on {}",
                    seed_raw, config.crawl.domain
                ))
            })?;

        let renderer = match &self.renderer {
            Some(renderer) => Arc::clone(renderer),
            None => Arc::new(HttpRenderer::new(&config.user_agent)?) as Arc<dyn PageRenderer>,
        };

        let output_dir = config.domain_output_dir();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(SinkError::from)?;
        let claimed = claim_key(&output_dir).await;
        let run_id = self.claim(&claimed, &config.crawl.domain)?;

        let sink = match ResultSink::open(&output_dir, &config.output, options.fresh).await {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                release(&self.active, &claimed, run_id);
                return Err(e.into());
            }
        };

        let run = Arc::new(RunControl::new(
            run_id,
            config.crawl.domain.clone(),
            sink,
            self.events.clone(),
        ));
        self.lock_runs().insert(run_id, Arc::clone(&run));

        self.events.publish(CrawlEvent::RunStarted {
            run_id,
            domain: config.crawl.domain.clone(),
            seed: seed.to_string(),
            concurrency: config.crawl.concurrency,
        });
        run.transition(RunState::Running);

        let ctx = Arc::new(WorkerContext {
            run: Arc::clone(&run),
            config: Arc::new(config),
            filter,
            renderer,
        });
        tokio::spawn(drive_run(ctx, seed, Arc::clone(&self.active), claimed));

        Ok(run_id)
    }

    /// Requests a stop; returns false for an unknown run
    ///
    /// No new fetch starts after this returns. In-flight fetches get the
    /// configured grace period, then the final flush runs and the run ends in
    /// `Stopped`.
    pub fn stop_crawl(&self, run_id: RunId) -> bool {
        match self.run(run_id) {
            Some(run) => {
                if !run.state().is_terminal() {
                    run.request_stop(StopReason::Requested);
                }
                true
            }
            None => false,
        }
    }

    pub fn status(&self, run_id: RunId) -> Option<RunStatus> {
        self.run(run_id).map(|run| run.status())
    }

    /// Status of every run this controller started
    pub fn runs(&self) -> Vec<RunStatus> {
        let mut statuses: Vec<RunStatus> =
            self.lock_runs().values().map(|run| run.status()).collect();
        statuses.sort_by_key(|status| status.run_id);
        statuses
    }

    /// Waits until the run is terminal and returns its final status
    pub async fn wait(&self, run_id: RunId) -> Option<RunStatus> {
        let run = self.run(run_id)?;
        let mut state = run.state.subscribe();
        // The sender lives as long as `run`, so this only fails if it was dropped
        let _ = state.wait_for(|state| state.is_terminal()).await;
        Some(run.status())
    }

    /// Retries flushing whatever a degraded run still holds in memory
    pub async fn flush(&self, run_id: RunId) -> Option<Result<FlushReport, SinkError>> {
        let run = self.run(run_id)?;
        Some(
            run.sink
                .flush_and_report(run.run_id, &run.events, &run.stats)
                .await,
        )
    }

    fn run(&self, run_id: RunId) -> Option<Arc<RunControl>> {
        self.lock_runs().get(&run_id).cloned()
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<RunId, Arc<RunControl>>> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserves the output directory and allocates a run id
    fn claim(&self, output_dir: &Path, domain: &str) -> Result<RunId, StartError> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(&run_id) = active.get(output_dir) {
            return Err(StartError::AlreadyRunning {
                domain: domain.to_string(),
                run_id,
            });
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::AcqRel);
        active.insert(output_dir.to_path_buf(), run_id);
        Ok(run_id)
    }
}

impl Default for CrawlController {
    fn default() -> Self {
        Self::new()
    }
}

/// Key under which an output directory is claimed
///
/// Different spellings of one directory (`out`, `./out`, its absolute path)
/// map to the same key.
async fn claim_key(dir: &Path) -> PathBuf {
    if let Ok(path) = tokio::fs::canonicalize(dir).await {
        return path;
    }

    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(dir))
            .unwrap_or_else(|_| dir.to_path_buf())
    };
    absolute
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

fn release(active: &Mutex<HashMap<PathBuf, RunId>>, output_dir: &Path, run_id: RunId) {
    let mut active = active
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if active.get(output_dir) == Some(&run_id) {
        active.remove(output_dir);
    }
}

/// Body of the background task that owns one run
async fn drive_run(
    ctx: Arc<WorkerContext>,
    seed: Url,
    active: Arc<Mutex<HashMap<PathBuf, RunId>>>,
    output_dir: PathBuf,
) {
    let run = Arc::clone(&ctx.run);

    // The seed is fetched even when it matches no allowed prefix
    if run.frontier.enqueue(seed, 0) {
        run.stats.record_queued(1);
    }
    if ctx.config.crawl.sitemap_seeding {
        seed_from_sitemap(&ctx).await;
    }

    let flusher_shutdown = CancellationToken::new();
    let flusher = run.sink.spawn_flusher(
        ctx.config.output.flush_interval(),
        run.run_id,
        run.events.clone(),
        Arc::clone(&run.stats),
        flusher_shutdown.clone(),
    );

    let workers: Vec<_> = (0..ctx.config.crawl.concurrency)
        .map(|worker| tokio::spawn(run_worker(worker, Arc::clone(&ctx))))
        .collect();

    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Worker task of run {} ended abnormally: {}", run.run_id, e);
        }
    }

    flusher_shutdown.cancel();
    if let Err(e) = flusher.await {
        tracing::error!("Flusher of run {} ended abnormally: {}", run.run_id, e);
    }

    // Nothing accepted before this point may stay only in memory
    if let Err(e) = run
        .sink
        .flush_and_report(run.run_id, &run.events, &run.stats)
        .await
    {
        tracing::error!(
            "Final flush of run {} failed, {} records still in memory: {}",
            run.run_id,
            run.sink.buffered(),
            e
        );
    }

    release(&active, &output_dir, run.run_id);
    run.finish();
}

/// Queues the in-scope `<loc>` entries of `/sitemap.xml` at depth 0
async fn seed_from_sitemap(ctx: &WorkerContext) -> usize {
    let run = &ctx.run;
    let sitemap = match Url::parse(&format!("{}/sitemap.xml", ctx.config.crawl.origin())) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("Cannot build sitemap URL: {}", e);
            return 0;
        }
    };

    let timeout = ctx.config.renderer.render_timeout();
    let outcome = tokio::select! {
        _ = run.cancel.cancelled() => return 0,
        outcome = tokio::time::timeout(timeout, ctx.renderer.fetch_document(&sitemap, timeout)) => outcome,
    };

    let outcome = match outcome {
        Ok(outcome) if outcome.is_ok() => outcome,
        Ok(outcome) => {
            tracing::warn!("Sitemap {} unavailable: {:?}", sitemap, outcome.status);
            return 0;
        }
        Err(_) => {
            tracing::warn!("Sitemap {} timed out", sitemap);
            return 0;
        }
    };

    let mut queued = 0;
    for loc in extract_sitemap_locs(&outcome.raw_content) {
        if let Some(url) = ctx.filter.accept(&loc, None) {
            if run.frontier.enqueue(url, 0) {
                queued += 1;
            }
        }
    }

    run.stats.record_queued(queued as u64);
    tracing::info!("Seeded {} URLs from {}", queued, sitemap);
    queued
}
