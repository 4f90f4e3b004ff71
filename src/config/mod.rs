//! Configuration module for Shoal
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use shoal::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("shoal.toml")).unwrap();
//! println!("Crawling {} with {} workers", config.crawl.domain, config.crawl.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, CrawlMode, OutputConfig, RendererConfig, UserAgentConfig,
    DEFAULT_EXCLUDED_EXTENSIONS, MAX_FLUSH_EVERY_SECONDS,
};

// Re-export parser functions
pub use parser::{config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
