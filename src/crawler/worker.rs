//! Worker loop
//!
//! Each worker repeatedly takes one entry from the frontier, waits out the
//! request delay, renders the page (retrying failed attempts with backoff),
//! feeds in-scope links back into the frontier and hands the finished
//! [`PageResult`] to the sink. A worker owns at most one in-flight fetch.

use crate::config::Config;
use crate::crawler::controller::RunControl;
use crate::crawler::events::CrawlEvent;
use crate::crawler::extractor::extract;
use crate::crawler::frontier::FrontierEntry;
use crate::crawler::renderer::{PageRenderer, RenderOutcome, RenderStatus};
use crate::output::{PageResult, PageStatus};
use crate::state::StopReason;
use crate::url::{normalize, UrlFilter};
use std::sync::Arc;
use url::Url;

/// Everything a worker needs, shared by the whole pool
pub(crate) struct WorkerContext {
    pub run: Arc<RunControl>,
    pub config: Arc<Config>,
    pub filter: UrlFilter,
    pub renderer: Arc<dyn PageRenderer>,
}

/// Runs one worker until the frontier is drained or closed
pub(crate) async fn run_worker(worker: u32, ctx: Arc<WorkerContext>) {
    let run = &ctx.run;
    run.events.publish(CrawlEvent::WorkerStarted {
        run_id: run.run_id,
        worker,
    });

    loop {
        let entry = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => None,
            entry = run.frontier.dequeue() => entry,
        };

        let Some(entry) = entry else {
            break;
        };

        let _done = run.frontier.task_guard();
        process_entry(&ctx, entry).await;
    }

    run.events.publish(CrawlEvent::WorkerStopped {
        run_id: run.run_id,
        worker,
    });
}

async fn process_entry(ctx: &WorkerContext, entry: FrontierEntry) {
    let run = &ctx.run;

    let delay = ctx.config.crawl.request_delay();
    if !delay.is_zero() {
        tokio::select! {
            _ = run.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    // No new fetch once a stop was requested
    if run.cancel.is_cancelled() || run.frontier.is_closed() {
        return;
    }

    let limit = ctx.config.crawl.max_pages;
    if !run.stats.try_begin_fetch(limit) {
        run.request_stop(StopReason::PageLimit);
        return;
    }
    if let Some(limit) = limit {
        if run.stats.fetches_started() >= limit {
            tracing::info!("Page limit of {} reached", limit);
            run.request_stop(StopReason::PageLimit);
        }
    }

    let (outcome, attempts) = render_with_retry(ctx, &entry.url).await;
    let url = entry.url.as_str();

    match outcome.status {
        RenderStatus::Ok => {
            let result = handle_page(ctx, &entry, &outcome, attempts);
            run.sink.accept(result);
        }
        RenderStatus::Error(detail) => {
            record_failure(ctx, url, entry.depth, PageStatus::Error, detail, attempts);
        }
        RenderStatus::Timeout => {
            let timeout_ms = ctx.config.renderer.render_timeout_ms;
            // A timeout that survived its retries is reported as a failed page
            let (status, detail) = if attempts > 1 {
                let detail = format!("timed out after {}ms on all {} attempts", timeout_ms, attempts);
                (PageStatus::Error, detail)
            } else {
                (PageStatus::Timeout, format!("timed out after {}ms", timeout_ms))
            };
            record_failure(ctx, url, entry.depth, status, detail, attempts);
        }
        RenderStatus::Unavailable(detail) => {
            record_failure(
                ctx,
                url,
                entry.depth,
                PageStatus::Error,
                format!("renderer unavailable: {}", detail),
                attempts,
            );
            run.fail(format!("Renderer unavailable: {}", detail));
        }
    }
}

/// Renders `url`, retrying failed attempts; returns the last outcome and the
/// number of attempts made
async fn render_with_retry(ctx: &WorkerContext, url: &Url) -> (RenderOutcome, u32) {
    let run = &ctx.run;
    let max_attempts = ctx.config.renderer.retry_attempts.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = render_once(ctx, url).await;

        let retryable = matches!(
            outcome.status,
            RenderStatus::Error(_) | RenderStatus::Timeout
        );
        if !retryable || attempt >= max_attempts || run.cancel.is_cancelled() {
            return (outcome, attempt);
        }

        let backoff = ctx.config.renderer.retry_backoff(attempt);
        run.stats.record_retry();
        run.events.publish(CrawlEvent::RetryScheduled {
            run_id: run.run_id,
            url: url.to_string(),
            attempt: attempt + 1,
            backoff_ms: backoff.as_millis() as u64,
        });

        tokio::select! {
            _ = run.cancel.cancelled() => return (outcome, attempt),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// One bounded render call
///
/// The renderer runs in its own task so a panic inside it becomes an error
/// outcome for this page. On cancellation the in-flight call gets
/// `cancel-timeout-ms` to finish before it is abandoned.
async fn render_once(ctx: &WorkerContext, url: &Url) -> RenderOutcome {
    let run = &ctx.run;
    let timeout = ctx.config.renderer.render_timeout();
    let mode = ctx.config.crawl.mode;

    let renderer = Arc::clone(&ctx.renderer);
    let target = url.clone();
    let task = tokio::spawn(async move { renderer.render(&target, mode, timeout).await });
    let abort = task.abort_handle();

    let render = tokio::time::timeout(timeout, task);
    tokio::pin!(render);

    let result = tokio::select! {
        result = &mut render => result,
        _ = run.cancel.cancelled() => {
            let grace = ctx.config.renderer.cancel_timeout();
            match tokio::time::timeout(grace, &mut render).await {
                Ok(result) => result,
                Err(_) => {
                    abort.abort();
                    tracing::debug!("Abandoned in-flight fetch of {} after {:?}", url, grace);
                    return RenderOutcome::error(url, "cancelled");
                }
            }
        }
    };

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) if e.is_panic() => {
            tracing::warn!("Renderer panicked while fetching {}", url);
            RenderOutcome::error(url, "renderer panicked")
        }
        Ok(Err(_)) => RenderOutcome::error(url, "cancelled"),
        Err(_) => {
            abort.abort();
            RenderOutcome::timeout(url)
        }
    }
}

/// Extracts a rendered page and queues its in-scope links
fn handle_page(
    ctx: &WorkerContext,
    entry: &FrontierEntry,
    outcome: &RenderOutcome,
    attempts: u32,
) -> PageResult {
    let run = &ctx.run;

    let final_url =
        normalize(&outcome.final_url, None).unwrap_or_else(|| entry.url.clone());
    if final_url != entry.url {
        run.frontier.mark_visited(&final_url);
    }

    let mut page = extract(&outcome.raw_content, &final_url, Some(&ctx.filter));
    let links = std::mem::take(&mut page.links);

    let child_depth = entry.depth + 1;
    let mut queued = 0;
    if ctx
        .config
        .crawl
        .max_depth
        .map_or(true, |max| child_depth <= max)
    {
        for link in &links {
            if let Ok(url) = Url::parse(link) {
                if run.frontier.enqueue(url, child_depth) {
                    queued += 1;
                }
            }
        }
    }

    run.stats.record_queued(queued as u64);
    run.stats.record_fetched();
    run.events.publish(CrawlEvent::PageFetched {
        run_id: run.run_id,
        url: entry.url.to_string(),
        final_url: final_url.to_string(),
        depth: entry.depth,
        links_queued: queued,
    });

    PageResult::fetched(
        entry.url.as_str(),
        final_url.as_str(),
        entry.depth,
        page,
        links,
        attempts,
    )
}

fn record_failure(
    ctx: &WorkerContext,
    url: &str,
    depth: u32,
    status: PageStatus,
    detail: String,
    attempts: u32,
) {
    let run = &ctx.run;
    run.stats.record_errored();
    run.events.publish(CrawlEvent::PageErrored {
        run_id: run.run_id,
        url: url.to_string(),
        status: status.to_string(),
        detail: detail.clone(),
        attempts,
    });
    run.sink
        .accept(PageResult::failed(url, depth, status, detail, attempts));
}
