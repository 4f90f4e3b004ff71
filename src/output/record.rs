//! The per-fetch record written to the output artifacts

use crate::crawler::ExtractedPage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one page fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Ok,
    Error,
    Timeout,
}

impl PageStatus {
    /// Returns true for `Error` and `Timeout`
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// One fetched (or failed) page
///
/// Created once per frontier entry after the last attempt and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// URL as dequeued from the frontier
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    pub title: String,

    /// Readable plain text of the page
    pub text: String,

    pub fetched_at: DateTime<Utc>,

    /// In-scope links discovered on the page, in document order
    pub links: Vec<String>,

    pub status: PageStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Hops from the seed
    #[serde(default)]
    pub depth: u32,

    /// First path segment, `og:type`, or "website"
    #[serde(default)]
    pub page_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Render attempts made, retries included
    #[serde(default)]
    pub attempts: u32,
}

impl PageResult {
    /// Builds the record for a successfully rendered and extracted page
    pub fn fetched(
        url: &str,
        final_url: &str,
        depth: u32,
        page: ExtractedPage,
        links: Vec<String>,
        attempts: u32,
    ) -> Self {
        Self {
            url: url.to_string(),
            final_url: final_url.to_string(),
            title: page.title,
            text: page.text,
            fetched_at: Utc::now(),
            links,
            status: PageStatus::Ok,
            error_detail: None,
            depth,
            page_type: page.page_type,
            canonical_url: page.canonical_url,
            description: page.description,
            attempts,
        }
    }

    /// Builds the record for a page whose every attempt failed
    pub fn failed(
        url: &str,
        depth: u32,
        status: PageStatus,
        detail: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            title: String::new(),
            text: String::new(),
            fetched_at: Utc::now(),
            links: Vec::new(),
            status,
            error_detail: Some(detail.into()),
            depth,
            page_type: String::new(),
            canonical_url: None,
            description: None,
            attempts,
        }
    }
}
