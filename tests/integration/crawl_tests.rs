//! Integration tests for the crawler
//!
//! Most tests drive the controller with a scripted in-process renderer so the
//! page graph, failures and timing are deterministic. The last group uses
//! wiremock to run the HTTP renderer end to end.

use async_trait::async_trait;
use shoal::config::{Config, CrawlMode};
use shoal::crawler::{
    CrawlController, CrawlEvent, PageRenderer, RenderOutcome, RunId, StartOptions,
};
use shoal::output::{PageResult, PageStatus};
use shoal::state::{RunState, RunStatus, StopReason};
use shoal::StartError;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// What the scripted renderer does for one URL
enum Behavior {
    Html(String),
    Error(&'static str),
    Timeout,
    Unavailable,
    /// Never answers
    Hang,
    /// Answers after a delay
    Slow(Duration, String),
    /// Panics inside the render call
    Panic,
    /// Serves the page as if it had been redirected
    Redirect { to: String, html: String },
}

type Script = dyn Fn(&Url) -> Behavior + Send + Sync;

/// Renderer answering from a closure and recording every call
struct ScriptedRenderer {
    script: Box<Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRenderer {
    fn new(script: impl Fn(&Url) -> Behavior + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|url| Url::parse(url).unwrap().path() == path)
            .count()
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn render(&self, url: &Url, _mode: CrawlMode, _timeout: Duration) -> RenderOutcome {
        self.calls.lock().unwrap().push(url.to_string());
        // Give other workers a chance to interleave
        tokio::task::yield_now().await;

        match (self.script)(url) {
            Behavior::Html(html) => RenderOutcome::ok(url.as_str(), html),
            Behavior::Error(detail) => RenderOutcome::error(url, detail),
            Behavior::Timeout => RenderOutcome::timeout(url),
            Behavior::Unavailable => RenderOutcome::unavailable(url, "no browser instance"),
            Behavior::Hang => std::future::pending().await,
            Behavior::Slow(delay, html) => {
                tokio::time::sleep(delay).await;
                RenderOutcome::ok(url.as_str(), html)
            }
            Behavior::Panic => panic!("scripted renderer panic at {}", url),
            Behavior::Redirect { to, html } => RenderOutcome::ok(to, html),
        }
    }
}

fn links_page(hrefs: &[&str]) -> String {
    let anchors: String = hrefs
        .iter()
        .map(|href| format!(r#"<a href="{}">{}</a>"#, href, href))
        .collect();
    format!(
        "<html><head><title>Page</title></head><body><p>Some text</p>{}</body></html>",
        anchors
    )
}

fn test_config(output_dir: &Path, prefixes: &[&str], concurrency: u32) -> Config {
    let mut config = Config::for_domain("example.com");
    config.crawl.allowed_prefixes = prefixes.iter().map(|p| p.to_string()).collect();
    config.crawl.concurrency = concurrency;
    config.renderer.render_timeout_ms = 2_000;
    config.renderer.retry_backoff_ms = 10;
    config.renderer.cancel_timeout_ms = 200;
    config.output.output_dir = output_dir.to_path_buf();
    config.output.flush_every_seconds = 0.05;
    config.output.flush_retry_backoff_ms = 10;
    config
}

async fn wait_for(controller: &CrawlController, run_id: RunId) -> RunStatus {
    tokio::time::timeout(Duration::from_secs(10), controller.wait(run_id))
        .await
        .expect("run did not finish in time")
        .expect("unknown run")
}

fn read_log(output_dir: &Path) -> Vec<PageResult> {
    let path = output_dir.join("example.com").join("pages.ndjson");
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn read_snapshot(output_dir: &Path) -> Vec<PageResult> {
    let path = output_dir.join("example.com").join("pages.json");
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn paths(records: &[PageResult]) -> HashSet<String> {
    records
        .iter()
        .map(|record| Url::parse(&record.url).unwrap().path().to_string())
        .collect()
}

fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_prefix_filter_and_seed_bypass() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/blog/a", "/blog/b", "/other"])),
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let run_id = controller
        .start_crawl(test_config(dir.path(), &["/blog"], 2))
        .await
        .unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.stats.pages_fetched, 3);
    assert_eq!(status.stats.pages_errored, 0);
    assert_eq!(renderer.calls_to("/other"), 0);

    let fetched: HashSet<String> = renderer
        .calls()
        .iter()
        .map(|url| Url::parse(url).unwrap().path().to_string())
        .collect();
    assert_eq!(fetched, set(&["/", "/blog/a", "/blog/b"]));

    let seed = read_log(dir.path())
        .into_iter()
        .find(|record| record.url == "https://example.com/")
        .unwrap();
    assert_eq!(seed.status, PageStatus::Ok);
    assert_eq!(seed.title, "Page");
    assert_eq!(
        seed.links,
        vec!["https://example.com/blog/a", "https://example.com/blog/b"]
    );
}

#[tokio::test]
async fn test_timeout_is_retried_once_then_recorded() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/slow", "/fine"])),
        "/slow" => Behavior::Timeout,
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let run_id = controller
        .start_crawl(test_config(dir.path(), &[], 2))
        .await
        .unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(renderer.calls_to("/slow"), 2);
    assert_eq!(renderer.calls_to("/fine"), 1);
    assert_eq!(status.stats.pages_fetched, 2);
    assert_eq!(status.stats.pages_errored, 1);
    assert_eq!(status.stats.retries, 1);

    let slow = read_log(dir.path())
        .into_iter()
        .find(|record| record.url.ends_with("/slow"))
        .unwrap();
    assert_eq!(slow.status, PageStatus::Error);
    assert_eq!(slow.attempts, 2);
    assert!(slow.error_detail.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_timeout_without_retry_keeps_timeout_status() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/slow"])),
        "/slow" => Behavior::Timeout,
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let mut config = test_config(dir.path(), &[], 1);
    config.renderer.retry_attempts = 0;
    let run_id = controller.start_crawl(config).await.unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(renderer.calls_to("/slow"), 1);
    assert_eq!(status.stats.retries, 0);

    let slow = read_log(dir.path())
        .into_iter()
        .find(|record| record.url.ends_with("/slow"))
        .unwrap();
    assert_eq!(slow.status, PageStatus::Timeout);
    assert!(slow.status.is_failure());
    assert_eq!(slow.attempts, 1);
}

#[tokio::test]
async fn test_error_page_does_not_abort_run() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/broken", "/ok"])),
        "/broken" => Behavior::Error("HTTP 500"),
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let run_id = controller
        .start_crawl(test_config(dir.path(), &[], 1))
        .await
        .unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert!(status.error.is_none());

    let broken = read_log(dir.path())
        .into_iter()
        .find(|record| record.url.ends_with("/broken"))
        .unwrap();
    assert_eq!(broken.status, PageStatus::Error);
    assert_eq!(broken.error_detail.as_deref(), Some("HTTP 500"));
    assert_eq!(broken.attempts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_pages_caps_infinite_graph() {
    let dir = TempDir::new().unwrap();
    // Page n links to n+1 and n+2, forever
    let renderer = ScriptedRenderer::new(|url| {
        let n: u64 = url
            .path()
            .trim_start_matches("/n/")
            .parse()
            .unwrap_or(0);
        Behavior::Html(links_page(&[
            &format!("/n/{}", n + 1),
            &format!("/n/{}", n + 2),
        ]))
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let mut config = test_config(dir.path(), &[], 3);
    config.crawl.max_pages = Some(5);
    let run_id = controller.start_crawl(config).await.unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Stopped);
    assert_eq!(status.stop_reason, Some(StopReason::PageLimit));
    assert_eq!(status.stats.fetches_started, 5);
    assert_eq!(status.stats.pages_fetched, 5);
    assert_eq!(renderer.calls().len(), 5);
    assert_eq!(read_log(dir.path()).len(), 5);
}

#[tokio::test]
async fn test_max_depth_limits_link_following() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| {
        let next = format!("{}/deeper", url.path().trim_end_matches('/'));
        Behavior::Html(links_page(&[&next]))
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let mut config = test_config(dir.path(), &[], 2);
    config.crawl.max_depth = Some(2);
    let run_id = controller.start_crawl(config).await.unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(
        paths(&read_log(dir.path())),
        set(&["/", "/deeper", "/deeper/deeper"])
    );
    let depths: Vec<u32> = read_log(dir.path()).iter().map(|r| r.depth).collect();
    assert_eq!(depths.iter().max(), Some(&2));
}

#[tokio::test]
async fn test_redirect_target_not_fetched_again() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/old"])),
        "/old" => Behavior::Redirect {
            to: "https://example.com/new".to_string(),
            html: links_page(&["/new", "/after"]),
        },
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let run_id = controller
        .start_crawl(test_config(dir.path(), &[], 2))
        .await
        .unwrap();
    wait_for(&controller, run_id).await;

    assert_eq!(renderer.calls_to("/new"), 0);
    assert_eq!(renderer.calls_to("/after"), 1);

    let old = read_log(dir.path())
        .into_iter()
        .find(|record| record.url.ends_with("/old"))
        .unwrap();
    assert_eq!(old.final_url, "https://example.com/new");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_url_fetched_once_under_concurrency() {
    let dir = TempDir::new().unwrap();
    // Every page links to every other page, with varying spellings
    let renderer = ScriptedRenderer::new(|_| {
        let hrefs: Vec<String> = (0..20)
            .flat_map(|i| {
                vec![
                    format!("/p/{}", i),
                    format!("/p/{}/", i),
                    format!("https://EXAMPLE.com/p/{}#frag", i),
                ]
            })
            .collect();
        let refs: Vec<&str> = hrefs.iter().map(String::as_str).collect();
        Behavior::Html(links_page(&refs))
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let run_id = controller
        .start_crawl(test_config(dir.path(), &[], 8))
        .await
        .unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);

    let calls = renderer.calls();
    let unique: HashSet<&String> = calls.iter().collect();
    assert_eq!(calls.len(), 21);
    assert_eq!(unique.len(), 21);
    assert_eq!(status.stats.pages_fetched, 21);
    assert_eq!(status.stats.pages_queued, 21);
}

#[tokio::test]
async fn test_results_reach_both_artifacts() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/a", "/b", "/c"])),
        "/c" => Behavior::Error("HTTP 404"),
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer);

    let mut config = test_config(dir.path(), &[], 2);
    // Only the final flush writes anything
    config.output.flush_every_seconds = 3600.0;
    config.output.flush_every_items = 1000;
    let run_id = controller.start_crawl(config).await.unwrap();
    let status = wait_for(&controller, run_id).await;

    assert!(!status.degraded);
    assert!(status.stats.flushes >= 1);

    let log = read_log(dir.path());
    let snapshot = read_snapshot(dir.path());
    assert_eq!(log.len(), 4);
    assert_eq!(paths(&log), paths(&snapshot));
    assert_eq!(paths(&log), set(&["/", "/a", "/b", "/c"]));
    assert!(!dir
        .path()
        .join("example.com")
        .join("pages.json.tmp")
        .exists());
}

#[tokio::test]
async fn test_panicking_render_fails_only_its_page() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/a", "/boom", "/b"])),
        "/boom" => Behavior::Panic,
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let run_id = controller
        .start_crawl(test_config(dir.path(), &[], 2))
        .await
        .unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(renderer.calls_to("/boom"), 2);
    assert_eq!(status.stats.pages_fetched, 3);
    assert_eq!(status.stats.pages_errored, 1);

    let log = read_log(dir.path());
    assert_eq!(paths(&log), set(&["/", "/a", "/b", "/boom"]));
    let boom = log
        .iter()
        .find(|record| record.url == "https://example.com/boom")
        .unwrap();
    assert_eq!(boom.status, PageStatus::Error);
    assert_eq!(boom.error_detail.as_deref(), Some("renderer panicked"));
    assert_eq!(boom.attempts, 2);
}

#[tokio::test]
async fn test_failed_flush_degrades_then_recovers() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Slow(Duration::from_millis(200), links_page(&["/a", "/b"])),
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer);
    let mut events = controller.subscribe();

    let mut config = test_config(dir.path(), &[], 2);
    config.output.flush_retry_attempts = 1;
    let run_id = controller.start_crawl(config).await.unwrap();

    // Nothing is buffered while the seed is rendering; make the log unwritable
    let log_path = dir.path().join("example.com").join("pages.ndjson");
    std::fs::remove_file(&log_path).unwrap();
    std::fs::create_dir(&log_path).unwrap();

    let status = wait_for(&controller, run_id).await;
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.stats.pages_fetched, 3);
    assert!(status.degraded);

    let mut flush_failed = false;
    while let Ok(event) = events.try_recv() {
        if let CrawlEvent::FlushFailed { buffered, .. } = event {
            assert!(buffered > 0);
            flush_failed = true;
        }
    }
    assert!(flush_failed);

    std::fs::remove_dir(&log_path).unwrap();
    let report = controller.flush(run_id).await.unwrap().unwrap();
    assert_eq!(report.logged, 3);
    assert_eq!(report.snapshotted, 3);
    assert!(!controller.status(run_id).unwrap().degraded);

    assert_eq!(paths(&read_log(dir.path())), set(&["/", "/a", "/b"]));
    assert_eq!(read_snapshot(dir.path()).len(), 3);
}

#[tokio::test]
async fn test_output_accumulates_unless_fresh() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/a"])),
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer);

    for _ in 0..2 {
        let run_id = controller
            .start_crawl(test_config(dir.path(), &[], 1))
            .await
            .unwrap();
        wait_for(&controller, run_id).await;
    }
    assert_eq!(read_log(dir.path()).len(), 4);
    assert_eq!(read_snapshot(dir.path()).len(), 4);

    let run_id = controller
        .start_crawl_with(test_config(dir.path(), &[], 1), StartOptions { fresh: true })
        .await
        .unwrap();
    wait_for(&controller, run_id).await;
    assert_eq!(read_log(dir.path()).len(), 2);
    assert_eq!(read_snapshot(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_stop_mid_run_flushes_before_stopped() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => {
            let hrefs: Vec<String> = (0..20).map(|i| format!("/slow/{}", i)).collect();
            let refs: Vec<&str> = hrefs.iter().map(String::as_str).collect();
            Behavior::Html(links_page(&refs))
        }
        _ => Behavior::Hang,
    });
    let controller = CrawlController::with_renderer(renderer.clone());
    let mut events = controller.subscribe();

    let mut config = test_config(dir.path(), &[], 2);
    config.output.flush_every_seconds = 3600.0;
    config.output.flush_every_items = 1000;
    let run_id = controller.start_crawl(config).await.unwrap();

    // Wait until both workers are stuck in a fetch
    tokio::time::timeout(Duration::from_secs(5), async {
        while renderer.calls().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers never started fetching");

    assert!(controller.stop_crawl(run_id));
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Stopped);
    assert_eq!(status.stop_reason, Some(StopReason::Requested));
    assert!(renderer.calls().len() < 21, "frontier kept being drained");

    let log = read_log(dir.path());
    assert_eq!(
        log.len() as u64,
        status.stats.pages_fetched + status.stats.pages_errored
    );
    let cancelled = log
        .iter()
        .filter(|record| record.error_detail.as_deref() == Some("cancelled"))
        .count();
    assert!(cancelled >= 1);

    // Stopping, then the final flush, then Stopped
    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            CrawlEvent::StateChanged { to, .. } => order.push(format!("state:{}", to)),
            CrawlEvent::FlushCompleted { .. } => order.push("flush".to_string()),
            _ => {}
        }
    }
    assert_eq!(
        order,
        vec!["state:running", "state:stopping", "flush", "state:stopped"]
    );
}

#[tokio::test]
async fn test_second_start_for_same_domain_rejected() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|_| Behavior::Hang);
    let controller = CrawlController::with_renderer(renderer);

    let first = controller
        .start_crawl(test_config(dir.path(), &[], 1))
        .await
        .unwrap();

    match controller
        .start_crawl(test_config(dir.path(), &[], 1))
        .await
    {
        Err(StartError::AlreadyRunning { run_id, domain }) => {
            assert_eq!(run_id, first);
            assert_eq!(domain, "example.com");
        }
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }

    // A different output directory is a different run slot
    let other_dir = TempDir::new().unwrap();
    let second = controller
        .start_crawl(test_config(other_dir.path(), &[], 1))
        .await
        .unwrap();
    assert_ne!(first, second);

    controller.stop_crawl(first);
    controller.stop_crawl(second);
    wait_for(&controller, first).await;
    wait_for(&controller, second).await;

    // Released once terminal
    let third = controller
        .start_crawl(test_config(dir.path(), &[], 1))
        .await
        .unwrap();
    controller.stop_crawl(third);
    wait_for(&controller, third).await;
}

#[tokio::test]
async fn test_same_directory_spelled_differently_rejected() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|_| Behavior::Hang);
    let controller = CrawlController::with_renderer(renderer);

    let first = controller
        .start_crawl(test_config(dir.path(), &[], 1))
        .await
        .unwrap();

    let dotted = dir.path().join(".");
    match controller.start_crawl(test_config(&dotted, &[], 1)).await {
        Err(StartError::AlreadyRunning { run_id, .. }) => assert_eq!(run_id, first),
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }

    controller.stop_crawl(first);
    wait_for(&controller, first).await;
}

#[tokio::test]
async fn test_invalid_config_never_runs() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|_| Behavior::Html(String::new()));
    let controller = CrawlController::with_renderer(renderer.clone());

    let config = test_config(dir.path(), &[], 0);
    assert!(matches!(
        controller.start_crawl(config).await,
        Err(StartError::InvalidConfig(_))
    ));

    let mut config = test_config(dir.path(), &[], 1);
    config.crawl.domain = "not a domain".to_string();
    assert!(matches!(
        controller.start_crawl(config).await,
        Err(StartError::InvalidConfig(_))
    ));

    assert!(renderer.calls().is_empty());
    assert!(controller.runs().is_empty());
    assert!(controller.status(1).is_none());
    assert!(!controller.stop_crawl(1));
}

#[tokio::test]
async fn test_unavailable_renderer_fails_run() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/a", "/b"])),
        _ => Behavior::Unavailable,
    });
    let controller = CrawlController::with_renderer(renderer.clone());

    let run_id = controller
        .start_crawl(test_config(dir.path(), &[], 1))
        .await
        .unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Failed);
    assert!(status
        .error
        .as_deref()
        .unwrap()
        .contains("no browser instance"));
    // Unavailable is not retried and the run stops after the first one
    assert_eq!(renderer.calls().len(), 2);
    assert_eq!(read_log(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_event_stream_brackets_run() {
    let dir = TempDir::new().unwrap();
    let renderer = ScriptedRenderer::new(|url| match url.path() {
        "/" => Behavior::Html(links_page(&["/a"])),
        _ => Behavior::Html(links_page(&[])),
    });
    let controller = CrawlController::with_renderer(renderer);
    let mut events = controller.subscribe();

    let run_id = controller
        .start_crawl(test_config(dir.path(), &[], 2))
        .await
        .unwrap();
    wait_for(&controller, run_id).await;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.run_id(), run_id);
        received.push(event);
    }

    assert!(matches!(received.first(), Some(CrawlEvent::RunStarted { .. })));
    assert!(matches!(
        received.last(),
        Some(CrawlEvent::RunFinished {
            state: RunState::Completed,
            ..
        })
    ));
    let fetched = received
        .iter()
        .filter(|event| matches!(event, CrawlEvent::PageFetched { .. }))
        .count();
    assert_eq!(fetched, 2);
    let workers_started = received
        .iter()
        .filter(|event| matches!(event, CrawlEvent::WorkerStarted { .. }))
        .count();
    assert_eq!(workers_started, 2);
}

/// Builds a config pointing at a wiremock server
fn http_config(server: &MockServer, output_dir: &Path, prefixes: &[&str]) -> Config {
    let uri = Url::parse(&server.uri()).unwrap();
    let mut config = test_config(output_dir, prefixes, 2);
    config.crawl.domain = uri.host_str().unwrap().to_string();
    config.crawl.scheme = "http".to_string();
    config.crawl.port = uri.port();
    config
}

#[tokio::test]
async fn test_http_crawl_end_to_end() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(links_page(&["/docs/intro", "/docs/logo.png", "/pricing"]))
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/docs/intro"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    "<html><head><title>Intro</title></head><body><h1>Intro</h1><p>Hello</p><a href=\"/docs/missing\">x</a></body></html>",
                )
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/docs/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pricing"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0) // Outside the allowed prefixes
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/docs/logo.png"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0) // Static asset
        .mount(&server)
        .await;

    let config = http_config(&server, dir.path(), &["/docs"]);
    let domain = config.crawl.domain.clone();
    let controller = CrawlController::new();
    let run_id = controller.start_crawl(config).await.unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.stats.pages_fetched, 2);
    assert_eq!(status.stats.pages_errored, 1);

    let log_path = dir.path().join(&domain).join("pages.ndjson");
    let records: Vec<PageResult> = std::fs::read_to_string(log_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let intro = records
        .iter()
        .find(|record| record.url.ends_with("/docs/intro"))
        .unwrap();
    assert_eq!(intro.title, "Intro");
    assert_eq!(intro.text, "# Intro\nHello\nx");
    assert_eq!(intro.page_type, "docs");

    let missing = records
        .iter()
        .find(|record| record.url.ends_with("/docs/missing"))
        .unwrap();
    assert_eq!(missing.status, PageStatus::Error);
    assert_eq!(missing.error_detail.as_deref(), Some("HTTP 404"));
}

#[tokio::test]
async fn test_http_sitemap_seeding() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    "<urlset><url><loc>{0}/docs/hidden</loc></url><url><loc>{0}/elsewhere</loc></url></urlset>",
                    server.uri()
                ))
                .insert_header("content-type", "application/xml"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(links_page(&[]))
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/docs/hidden"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(links_page(&[]))
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = http_config(&server, dir.path(), &["/docs"]);
    config.crawl.sitemap_seeding = true;
    let controller = CrawlController::new();
    let run_id = controller.start_crawl(config).await.unwrap();
    let status = wait_for(&controller, run_id).await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.stats.pages_fetched, 2);
}
