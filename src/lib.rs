//! Shoal: a domain-scoped web crawler
//!
//! This crate crawls a single domain from a start URL, following only links
//! under a set of allowed path prefixes. A pool of workers renders pages,
//! extracts readable text and links, and streams results to an append-only
//! log plus a rolling snapshot on disk.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod url;

use thiserror::Error;

/// Any error surfaced by the crate's public API
#[derive(Debug, Error)]
pub enum ShoalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot start crawl: {0}")]
    Start(#[from] StartError),

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("cannot write results: {0}")]
    Sink(#[from] output::SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems loading or validating a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("invalid URL in configuration: {0}")]
    InvalidUrl(String),

    #[error("invalid domain: {0}")]
    InvalidPattern(String),
}

/// Reasons a URL cannot be normalized
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("unparseable URL: {0}")]
    Parse(String),

    #[error("unsupported scheme: {0}")]
    InvalidScheme(String),

    #[error("URL has no host")]
    MissingDomain,

    #[error("malformed URL: {0}")]
    Malformed(String),
}

/// Why [`CrawlController::start_crawl`] refused to start a run
#[derive(Debug, Error)]
pub enum StartError {
    #[error("run {run_id} is still writing the output of {domain}")]
    AlreadyRunning { domain: String, run_id: u64 },

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("cannot prepare output directory: {0}")]
    Output(#[from] output::SinkError),

    #[error("cannot build HTTP renderer: {0}")]
    Renderer(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ShoalError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlController, HttpRenderer, PageRenderer, RunId};
pub use output::{PageResult, PageStatus};
pub use state::{RunState, RunStatus};
pub use url::{normalize, normalize_url, UrlFilter};
