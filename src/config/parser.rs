use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads, parses and validates the TOML file at `path`
///
/// ```no_run
/// use std::path::Path;
/// use shoal::config::load_config;
///
/// let config = load_config(Path::new("shoal.toml")).unwrap();
/// println!("crawling {}", config.crawl.domain);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_hash(path).map(|(config, _)| config)
}

/// Like [`load_config`], also returning the hex SHA-256 of the raw file
///
/// The digest is taken over the exact bytes that were parsed, so two runs
/// logging the same hash were configured identically.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, config_hash(&content)))
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    config.crawl.domain = config.crawl.domain.trim().to_lowercase();
    validate(&config)?;
    Ok(config)
}

/// Hex-encoded SHA-256 of configuration text
pub fn config_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
