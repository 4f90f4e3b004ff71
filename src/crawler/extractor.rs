//! Content extraction from rendered markup
//!
//! This module turns raw HTML into:
//! - Readable plain text (block structure kept, headings marked with `#`)
//! - The page title and a few metadata fields
//! - Candidate links to follow, normalized to absolute URLs
//!
//! Extraction is best effort and never fails: malformed markup yields
//! whatever the HTML parser recovers, possibly empty text.

use crate::url::{normalize, UrlFilter};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Elements whose contents never make it into the text
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "head", "iframe", "object",
];

/// Elements that start a new line of text
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "details", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "summary", "table", "tr", "ul",
];

/// Structured content of one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    /// `og:title`, else `<title>`, else empty
    pub title: String,

    pub text: String,

    /// Absolute, normalized link targets in document order, deduplicated
    pub links: Vec<String>,

    /// First path segment, else `og:type`, else "website"
    pub page_type: String,

    pub canonical_url: Option<String>,

    pub description: Option<String>,
}

/// Extracts text, title, metadata and links from `raw`
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">`
/// - `data-href` / `data-url` attributes on any element
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` targets
/// - Fragment-only links (same page anchors)
/// - Anything the optional `filter` rejects
///
/// # Example
///
/// ```
/// use shoal::crawler::extract;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base = Url::parse("https://example.com/").unwrap();
/// let page = extract(html, &base, None);
/// assert_eq!(page.title, "Test");
/// assert_eq!(page.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn extract(raw: &str, base: &Url, filter: Option<&UrlFilter>) -> ExtractedPage {
    let document = Html::parse_document(raw);

    let og_type = meta_content(&document, "meta[property='og:type']");
    let canonical_url = first_attr(&document, "link[rel='canonical'][href]", "href")
        .and_then(|href| resolve_link(&href, base))
        .map(|url| url.to_string());

    ExtractedPage {
        title: extract_title(&document),
        text: extract_text(&document),
        links: extract_links(&document, base, filter),
        page_type: page_type(base, og_type.as_deref()),
        canonical_url,
        description: meta_content(&document, "meta[name='description']"),
    }
}

/// Reads the `<loc>` entries of a sitemap (or sitemap index)
pub fn extract_sitemap_locs(xml: &str) -> Vec<String> {
    let document = Html::parse_document(xml);
    let Ok(selector) = Selector::parse("loc") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|loc| !loc.is_empty())
        .collect()
}

fn extract_title(document: &Html) -> String {
    if let Some(title) = meta_content(document, "meta[property='og:title']") {
        return title;
    }

    let Ok(title_selector) = Selector::parse("title") else {
        return String::new();
    };

    document
        .select(&title_selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .unwrap_or_default()
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    first_attr(document, selector, "content")
        .map(|content| collapse_whitespace(&content))
        .filter(|content| !content.is_empty())
}

fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .find_map(|element| element.value().attr(attr))
        .map(str::to_string)
}

fn page_type(base: &Url, og_type: Option<&str>) -> String {
    let first_segment = base
        .path_segments()
        .and_then(|mut segments| segments.next())
        .filter(|segment| !segment.is_empty());

    first_segment
        .or(og_type)
        .unwrap_or("website")
        .to_string()
}

fn extract_links(document: &Html, base: &Url, filter: Option<&UrlFilter>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str| {
        let Some(url) = resolve_link(href, base) else {
            return;
        };
        if filter.map_or(true, |filter| filter.in_scope(&url)) && seen.insert(url.to_string()) {
            links.push(url.to_string());
        }
    };

    // Document order across anchors and inline click targets
    if let Ok(selector) = Selector::parse("a[href], [data-href], [data-url]") {
        for element in document.select(&selector) {
            let value = element.value();
            if value.name() == "a" {
                // Skip if it has the download attribute
                if value.attr("download").is_some() {
                    continue;
                }
                if let Some(href) = value.attr("href") {
                    push(href);
                }
            }
            for attr in ["data-href", "data-url"] {
                if let Some(href) = value.attr(attr) {
                    push(href);
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// Resolves a link target against `base`
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Anything the normalizer rejects
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    normalize(href, Some(base))
}

fn extract_text(document: &Html) -> String {
    let mut text = TextBuilder::default();
    walk(document.root_element(), &mut text);
    text.finish()
}

fn heading_level(name: &str) -> Option<usize> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn walk(element: ElementRef<'_>, text: &mut TextBuilder) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    if name == "br" {
        text.break_line();
        return;
    }

    let heading = heading_level(name);
    let block = heading.is_some() || BLOCK_ELEMENTS.contains(&name);

    if block {
        text.break_line();
    }
    if let Some(level) = heading {
        text.prefix = Some(format!("{} ", "#".repeat(level)));
    }
    if name == "td" || name == "th" {
        text.pending_space = true;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(content) => text.push(content),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    walk(child, text);
                }
            }
            _ => {}
        }
    }

    if block {
        text.break_line();
    }
}

/// Accumulates text one line at a time, collapsing whitespace
#[derive(Debug, Default)]
struct TextBuilder {
    lines: Vec<String>,
    current: String,
    pending_space: bool,
    /// Emitted before the first word of the current line
    prefix: Option<String>,
}

impl TextBuilder {
    fn push(&mut self, content: &str) {
        if content.starts_with(char::is_whitespace) {
            self.pending_space = true;
        }

        let mut wrote = false;
        for word in content.split_whitespace() {
            if self.current.is_empty() {
                if let Some(prefix) = self.prefix.take() {
                    self.current.push_str(&prefix);
                }
            } else if self.pending_space {
                self.current.push(' ');
            }
            self.current.push_str(word);
            self.pending_space = true;
            wrote = true;
        }

        if wrote {
            self.pending_space = content.ends_with(char::is_whitespace);
        }
    }

    fn break_line(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
        }
        self.pending_space = false;
        self.prefix = None;
    }

    fn finish(mut self) -> String {
        self.break_line();
        self.lines.join("\n")
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
