//! URL handling module for Shoal
//!
//! This module provides URL normalization, domain extraction and the
//! scope filter deciding which discovered links a crawl may follow.

mod domain;
mod normalize;
mod scope;

// Re-export main functions
pub use domain::{extract_domain, host_matches};
pub use normalize::{normalize, normalize_url};
pub use scope::{in_scope, UrlFilter};
