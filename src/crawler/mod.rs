//! Crawl engine
//!
//! This module contains the core crawling logic, including:
//! - The frontier of pending URLs and its seen-set guard
//! - The page renderer boundary and its HTTP implementation
//! - Content extraction (text, title, metadata, links)
//! - The worker pool and the controller owning each run's lifecycle
//! - The event stream published while a run progresses

mod controller;
mod events;
mod extractor;
mod frontier;
mod renderer;
mod worker;

pub use controller::{CrawlController, RunId, StartOptions};
pub use events::{CrawlEvent, EventBus, DEFAULT_EVENT_CAPACITY};
pub use extractor::{extract, extract_sitemap_locs, ExtractedPage};
pub use frontier::{Frontier, FrontierEntry};
pub use renderer::{
    build_http_client, HttpRenderer, PageRenderer, RenderOutcome, RenderStatus,
    BROWSER_USER_AGENT, MAX_REDIRECTS,
};
