//! Shoal main entry point
//!
//! This is the command-line interface for the Shoal domain crawler.

use anyhow::Context;
use clap::Parser;
use shoal::config::{load_config_with_hash, Config};
use shoal::crawler::{CrawlController, StartOptions};
use shoal::output::{PageResult, LOG_FILE_NAME};
use shoal::state::RunState;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Shoal: a domain-scoped web crawler
///
/// Shoal crawls a single domain from a start page, following only links
/// under the allowed path prefixes, and streams page text and links to
/// `<output-dir>/<domain>/pages.ndjson` and `pages.json`.
#[derive(Parser, Debug)]
#[command(name = "shoal")]
#[command(version)]
#[command(about = "A domain-scoped web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Truncate the domain's output files before crawling
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "fresh"])]
    dry_run: bool,

    /// Summarize the domain's existing output and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shoal=info,warn"),
            1 => EnvFilter::new("shoal=debug,info"),
            2 => EnvFilter::new("shoal=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the resolved configuration
fn handle_dry_run(config: &Config) {
    let crawl = &config.crawl;

    println!("=== Shoal Dry Run ===\n");

    println!("Crawl:");
    println!("  Domain: {}", crawl.domain);
    println!("  Seed URL: {}", crawl.seed_url());
    if crawl.allowed_prefixes.is_empty() {
        println!("  Allowed prefixes: (any path)");
    } else {
        println!("  Allowed prefixes:");
        for prefix in &crawl.allowed_prefixes {
            println!("    * {}", prefix);
        }
    }
    println!("  Concurrency: {}", crawl.concurrency);
    println!("  Request delay: {}ms", crawl.request_delay_ms);
    println!("  Mode: {}", crawl.mode);
    match crawl.max_pages {
        Some(max) => println!("  Max pages: {}", max),
        None => println!("  Max pages: unlimited"),
    }
    if let Some(depth) = crawl.max_depth {
        println!("  Max depth: {}", depth);
    }
    println!("  Sitemap seeding: {}", crawl.sitemap_seeding);

    println!("\nRenderer:");
    println!("  Timeout: {}ms", config.renderer.render_timeout_ms);
    println!(
        "  Retries: {} (backoff {}ms)",
        config.renderer.retry_attempts, config.renderer.retry_backoff_ms
    );
    println!("  User agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Directory: {}", config.domain_output_dir().display());
    println!(
        "  Flush every {} items or {}s",
        config.output.flush_every_items, config.output.flush_every_seconds
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: counts the records of the domain's log
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let log_path = config.domain_output_dir().join(LOG_FILE_NAME);
    let content = std::fs::read_to_string(&log_path)
        .with_context(|| format!("Failed to read {}", log_path.display()))?;

    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut unreadable = 0;
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<PageResult>(line) {
            Ok(record) => *by_status.entry(record.status.to_string()).or_default() += 1,
            Err(_) => unreadable += 1,
        }
    }

    println!("Log: {}\n", log_path.display());
    println!("Records: {}", by_status.values().sum::<usize>());
    for (status, count) in &by_status {
        println!("  {}: {}", status, count);
    }
    if unreadable > 0 {
        println!("Unreadable lines: {}", unreadable);
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (truncating previous output)");
    }

    let controller = CrawlController::new();
    let run_id = controller
        .start_crawl_with(config, StartOptions { fresh })
        .await
        .context("Failed to start crawl")?;

    tokio::select! {
        status = controller.wait(run_id) => {
            return report(status);
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted, stopping crawl and flushing results");
            controller.stop_crawl(run_id);
        }
    }

    report(controller.wait(run_id).await)
}

fn report(status: Option<shoal::RunStatus>) -> anyhow::Result<()> {
    let status = status.context("Crawl run disappeared")?;
    let stats = &status.stats;

    tracing::info!(
        "Crawl {}: {} fetched, {} errored, {} queued, {} retries, {} flushes",
        status.state,
        stats.pages_fetched,
        stats.pages_errored,
        stats.pages_queued,
        stats.retries,
        stats.flushes
    );

    if status.degraded {
        tracing::warn!("Some results could not be written to disk");
    }

    if status.state == RunState::Failed {
        anyhow::bail!(
            "Crawl failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}
