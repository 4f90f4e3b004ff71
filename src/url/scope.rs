//! Scope filtering for discovered URLs
//!
//! A URL is in scope when its host is the crawled domain, its path starts
//! with one of the allowed prefixes (any path when none are configured), and
//! it does not point at a static asset.

use crate::config::CrawlConfig;
use crate::url::domain::{extract_domain, host_matches};
use crate::url::normalize::normalize;
use std::collections::HashSet;
use url::Url;

/// Decides which normalized URLs belong to a crawl
#[derive(Debug, Clone)]
pub struct UrlFilter {
    domain: String,
    include_subdomains: bool,
    allowed_prefixes: Vec<String>,
    excluded_extensions: HashSet<String>,
}

impl UrlFilter {
    pub fn new(config: &CrawlConfig) -> Self {
        Self {
            domain: config.domain.to_lowercase(),
            include_subdomains: config.include_subdomains,
            allowed_prefixes: config.allowed_prefixes.iter().cloned().collect(),
            excluded_extensions: config
                .excluded_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// True when the URL's host is the crawled domain
    pub fn on_domain(&self, url: &Url) -> bool {
        extract_domain(url)
            .map_or(false, |host| host_matches(&host, &self.domain, self.include_subdomains))
    }

    /// True when `path` starts with an allowed prefix (or no prefixes are set)
    pub fn path_allowed(&self, path: &str) -> bool {
        self.allowed_prefixes.is_empty()
            || self
                .allowed_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// True when the last path segment carries a denylisted extension
    pub fn is_static_asset(&self, url: &Url) -> bool {
        let last_segment = url.path().rsplit('/').next().unwrap_or_default();
        match last_segment.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                self.excluded_extensions.contains(&ext.to_lowercase())
            }
            _ => false,
        }
    }

    /// Full scope check for an already-normalized URL
    pub fn in_scope(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && self.on_domain(url)
            && self.path_allowed(url.path())
            && !self.is_static_asset(url)
    }

    /// Normalizes `raw` against `base` and keeps it only if it is in scope
    pub fn accept(&self, raw: &str, base: Option<&Url>) -> Option<Url> {
        normalize(raw, base).filter(|url| self.in_scope(url))
    }
}

/// Convenience wrapper building a filter for a single check
pub fn in_scope(url: &Url, config: &CrawlConfig) -> bool {
    UrlFilter::new(config).in_scope(url)
}
