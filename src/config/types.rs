use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// File extensions treated as static assets and never fetched
pub const DEFAULT_EXCLUDED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "avif", "css", "js", "mjs", "map",
    "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "webm", "ogg", "wav", "avi", "mov", "zip",
    "gz", "tgz", "rar", "7z", "pdf", "exe", "dmg", "iso",
];

/// Longest accepted flush interval (one day)
pub const MAX_FLUSH_EVERY_SECONDS: f64 = 86_400.0;

/// Main configuration structure for Shoal
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Builds a configuration for `domain` with every other setting at its default
    pub fn for_domain(domain: &str) -> Self {
        Self {
            crawl: CrawlConfig::for_domain(domain),
            renderer: RendererConfig::default(),
            user_agent: UserAgentConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Directory holding this domain's output artifacts
    pub fn domain_output_dir(&self) -> PathBuf {
        self.output.output_dir.join(&self.crawl.domain)
    }
}

/// Renderer profile requested for each fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Fast, identifies itself as a crawler
    #[default]
    Quick,
    /// Browser-like request profile
    Stealth,
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => write!(f, "quick"),
            Self::Stealth => write!(f, "stealth"),
        }
    }
}

/// What to crawl and how hard to push the target domain
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Bare host to crawl (e.g. "example.com")
    pub domain: String,

    /// Path (or full in-domain URL) the crawl starts from
    #[serde(default = "default_start_path")]
    pub start_path: String,

    /// Path prefixes a discovered link must start with; empty allows every path
    #[serde(default)]
    pub allowed_prefixes: BTreeSet<String>,

    /// Number of parallel workers
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Delay each worker waits before issuing a fetch (milliseconds)
    #[serde(default)]
    pub request_delay_ms: u64,

    #[serde(default)]
    pub mode: CrawlMode,

    /// Hard cap on fetches started during one run
    #[serde(default)]
    pub max_pages: Option<u64>,

    /// Links further than this many hops from a seed are not queued
    #[serde(default)]
    pub max_depth: Option<u32>,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Non-default port the site is served on
    #[serde(default)]
    pub port: Option<u16>,

    /// Also treat subdomains of `domain` as in scope
    #[serde(default)]
    pub include_subdomains: bool,

    #[serde(default = "default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,

    /// Seed the frontier from /sitemap.xml as well
    #[serde(default)]
    pub sitemap_seeding: bool,
}

impl CrawlConfig {
    pub fn for_domain(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            start_path: default_start_path(),
            allowed_prefixes: BTreeSet::new(),
            concurrency: default_concurrency(),
            request_delay_ms: 0,
            mode: CrawlMode::default(),
            max_pages: None,
            max_depth: None,
            scheme: default_scheme(),
            port: None,
            include_subdomains: false,
            excluded_extensions: default_excluded_extensions(),
            sitemap_seeding: false,
        }
    }

    /// Scheme, host and optional port, without a trailing slash
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.domain, port),
            None => format!("{}://{}", self.scheme, self.domain),
        }
    }

    /// The URL string the crawl is seeded with
    pub fn seed_url(&self) -> String {
        let start = self.start_path.trim();
        if start.starts_with("http://") || start.starts_with("https://") {
            start.to_string()
        } else if start.is_empty() {
            format!("{}/", self.origin())
        } else {
            format!("{}/{}", self.origin(), start.trim_start_matches('/'))
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Timeouts and retry policy around the page renderer
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RendererConfig {
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Extra attempts after a failed fetch
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay before a retry; multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long an in-flight fetch may keep running after a stop request
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,
}

impl RendererConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt.max(1))))
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            render_timeout_ms: default_render_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            cancel_timeout_ms: default_cancel_timeout_ms(),
        }
    }
}

/// How the crawler identifies itself in quick mode
///
/// Missing keys fall back to the defaults, so a section can override only
/// the contact details.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UserAgentConfig {
    pub crawler_name: String,
    pub crawler_version: String,
    /// Page describing the crawler, advertised in the header
    pub contact_url: String,
    pub contact_email: String,
}

impl UserAgentConfig {
    /// `name/version (+url; email)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "Shoal".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/bot".to_string(),
            contact_email: "crawler@example.com".to_string(),
        }
    }
}

/// Where and how often results are flushed
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Flush once this many results are buffered
    #[serde(default = "default_flush_every_items")]
    pub flush_every_items: usize,

    /// Flush at least this often while results are buffered
    #[serde(default = "default_flush_every_seconds")]
    pub flush_every_seconds: f64,

    #[serde(default = "default_flush_retry_attempts")]
    pub flush_retry_attempts: u32,

    /// Initial delay between flush retries; doubles each time
    #[serde(default = "default_flush_retry_backoff_ms")]
    pub flush_retry_backoff_ms: u64,
}

impl OutputConfig {
    /// Flush period, clamped to `[1ms, MAX_FLUSH_EVERY_SECONDS]`
    ///
    /// Values that are not a number fall back to the default period.
    pub fn flush_interval(&self) -> Duration {
        let secs = self.flush_every_seconds;
        let secs = if secs.is_nan() {
            default_flush_every_seconds()
        } else {
            secs.clamp(0.001, MAX_FLUSH_EVERY_SECONDS)
        };
        Duration::from_secs_f64(secs)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            flush_every_items: default_flush_every_items(),
            flush_every_seconds: default_flush_every_seconds(),
            flush_retry_attempts: default_flush_retry_attempts(),
            flush_retry_backoff_ms: default_flush_retry_backoff_ms(),
        }
    }
}

fn default_start_path() -> String {
    "/".to_string()
}

fn default_concurrency() -> u32 {
    5
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_excluded_extensions() -> Vec<String> {
    DEFAULT_EXCLUDED_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_render_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_cancel_timeout_ms() -> u64 {
    5_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_flush_every_items() -> usize {
    50
}

fn default_flush_every_seconds() -> f64 {
    10.0
}

fn default_flush_retry_attempts() -> u32 {
    3
}

fn default_flush_retry_backoff_ms() -> u64 {
    200
}
