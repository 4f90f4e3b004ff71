//! Page renderer boundary
//!
//! The worker pool only sees the [`PageRenderer`] trait: give it a URL, a
//! mode and a timeout, get back the final URL, the raw markup and a status.
//! [`HttpRenderer`] is the shipped implementation on top of `reqwest`.

use crate::config::{CrawlMode, UserAgentConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use url::Url;

/// Redirect hops followed before giving up
pub const MAX_REDIRECTS: usize = 10;

/// User agent sent in stealth mode
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// How a single render attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Ok,
    /// The page could not be rendered (HTTP error, bad content, network)
    Error(String),
    /// No answer within the timeout
    Timeout,
    /// The renderer has no capacity at all; fatal for the run
    Unavailable(String),
}

/// Result of one render call
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    /// URL after redirects
    pub final_url: String,
    pub raw_content: String,
    pub status: RenderStatus,
}

impl RenderOutcome {
    pub fn ok(final_url: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self {
            final_url: final_url.into(),
            raw_content: raw_content.into(),
            status: RenderStatus::Ok,
        }
    }

    pub fn error(url: &Url, detail: impl Into<String>) -> Self {
        Self::failed(url, RenderStatus::Error(detail.into()))
    }

    pub fn timeout(url: &Url) -> Self {
        Self::failed(url, RenderStatus::Timeout)
    }

    pub fn unavailable(url: &Url, detail: impl Into<String>) -> Self {
        Self::failed(url, RenderStatus::Unavailable(detail.into()))
    }

    fn failed(url: &Url, status: RenderStatus) -> Self {
        Self {
            final_url: url.to_string(),
            raw_content: String::new(),
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RenderStatus::Ok
    }
}

/// Fetches and renders pages for the worker pool
///
/// Implementations should honor `timeout` themselves. The worker runs each
/// call in its own task and bounds it, so a hung call cannot stall the pool
/// and a panicking call only fails its page.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url, mode: CrawlMode, timeout: Duration) -> RenderOutcome;

    /// Fetches a non-page document (e.g. a sitemap) as text
    async fn fetch_document(&self, url: &Url, timeout: Duration) -> RenderOutcome {
        self.render(url, CrawlMode::Quick, timeout).await
    }
}

/// Builds an HTTP client for the given mode
///
/// Quick mode identifies the crawler: `CrawlerName/Version (+ContactURL; ContactEmail)`.
/// Stealth mode looks like a desktop browser.
pub fn build_http_client(
    mode: CrawlMode,
    config: &UserAgentConfig,
) -> Result<Client, reqwest::Error> {
    let builder = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true);

    let builder = match mode {
        CrawlMode::Quick => builder.user_agent(config.header_value()),
        CrawlMode::Stealth => {
            let mut headers = HeaderMap::new();
            headers.insert(
                ACCEPT,
                HeaderValue::from_static(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                ),
            );
            headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
            builder
                .user_agent(BROWSER_USER_AGENT)
                .default_headers(headers)
        }
    };

    builder.build()
}

/// Renderer that fetches pages over plain HTTP
///
/// No JavaScript is executed; the response body is the page content.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    quick: Client,
    stealth: Client,
}

impl HttpRenderer {
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            quick: build_http_client(CrawlMode::Quick, config)?,
            stealth: build_http_client(CrawlMode::Stealth, config)?,
        })
    }

    fn client(&self, mode: CrawlMode) -> &Client {
        match mode {
            CrawlMode::Quick => &self.quick,
            CrawlMode::Stealth => &self.stealth,
        }
    }

    async fn get(
        &self,
        client: &Client,
        url: &Url,
        timeout: Duration,
        accept: fn(&str) -> bool,
    ) -> RenderOutcome {
        let request = async {
            let response = match client.get(url.clone()).timeout(timeout).send().await {
                Ok(response) => response,
                Err(e) => return classify_error(url, e),
            };

            let status = response.status();
            let final_url = response.url().to_string();

            if !status.is_success() {
                return RenderOutcome::error(url, format!("HTTP {}", status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_lowercase();

            if !accept(&content_type) {
                return RenderOutcome::error(
                    url,
                    format!("unsupported content type '{}'", content_type),
                );
            }

            match response.text().await {
                Ok(body) => RenderOutcome::ok(final_url, body),
                Err(e) => classify_error(url, e),
            }
        };

        // reqwest's own timeout may not cover every phase of the body read
        match tokio::time::timeout(timeout, request).await {
            Ok(outcome) => outcome,
            Err(_) => RenderOutcome::timeout(url),
        }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &Url, mode: CrawlMode, timeout: Duration) -> RenderOutcome {
        tracing::trace!("Rendering {} ({} mode)", url, mode);
        self.get(self.client(mode), url, timeout, is_html).await
    }

    async fn fetch_document(&self, url: &Url, timeout: Duration) -> RenderOutcome {
        self.get(&self.quick, url, timeout, |_| true).await
    }
}

/// True for HTML (or an unlabelled body, which browsers sniff as HTML)
fn is_html(content_type: &str) -> bool {
    content_type.is_empty()
        || content_type.contains("text/html")
        || content_type.contains("application/xhtml+xml")
}

/// Maps a transport error onto a render status
fn classify_error(url: &Url, e: reqwest::Error) -> RenderOutcome {
    if e.is_timeout() {
        RenderOutcome::timeout(url)
    } else if e.is_connect() {
        RenderOutcome::error(url, format!("connection failed: {}", e))
    } else if e.is_redirect() {
        RenderOutcome::error(url, format!("redirect error: {}", e))
    } else if e.is_builder() {
        RenderOutcome::unavailable(url, format!("HTTP client unusable: {}", e))
    } else {
        RenderOutcome::error(url, e.to_string())
    }
}
