use crate::config::types::{
    Config, CrawlConfig, OutputConfig, RendererConfig, UserAgentConfig, MAX_FLUSH_EVERY_SECONDS,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_renderer_config(&config.renderer)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the crawl section
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    validate_domain_string(&config.domain)?;

    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.scheme != "http" && config.scheme != "https" {
        return Err(ConfigError::Validation(format!(
            "scheme must be 'http' or 'https', got '{}'",
            config.scheme
        )));
    }

    if config.port == Some(0) {
        return Err(ConfigError::Validation("port cannot be 0".to_string()));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1 when set".to_string(),
        ));
    }

    for prefix in &config.allowed_prefixes {
        if !prefix.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "allowed prefix '{}' must start with '/'",
                prefix
            )));
        }
    }

    validate_start_path(config)?;

    Ok(())
}

/// The start path is either a path on the domain or a full URL on it
fn validate_start_path(config: &CrawlConfig) -> Result<(), ConfigError> {
    let start = config.start_path.trim();
    if start.is_empty() || start.starts_with('/') {
        return Ok(());
    }

    if start.starts_with("http://") || start.starts_with("https://") {
        let url = Url::parse(start)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start_path '{}': {}", start, e)))?;
        let host = url.host_str().unwrap_or_default().to_lowercase();
        if host != config.domain {
            return Err(ConfigError::Validation(format!(
                "start_path '{}' is not on domain '{}'",
                start, config.domain
            )));
        }
        return Ok(());
    }

    Err(ConfigError::Validation(format!(
        "start_path must start with '/' or be a full URL, got '{}'",
        start
    )))
}

fn validate_renderer_config(config: &RendererConfig) -> Result<(), ConfigError> {
    if config.render_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "render_timeout_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    let name = &config.crawler_name;
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(ConfigError::Validation(format!(
            "crawler_name must be non-empty alphanumerics and hyphens, got '{}'",
            name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("contact_url: {}", e)))?;

    validate_email(&config.contact_email)
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.output_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    if config.flush_every_items < 1 {
        return Err(ConfigError::Validation(format!(
            "flush_every_items must be >= 1, got {}",
            config.flush_every_items
        )));
    }

    let secs = config.flush_every_seconds;
    if !(secs > 0.0 && secs <= MAX_FLUSH_EVERY_SECONDS) {
        return Err(ConfigError::Validation(format!(
            "flush_every_seconds must be in (0, {}], got {}",
            MAX_FLUSH_EVERY_SECONDS, secs
        )));
    }

    Ok(())
}

/// A domain is a bare host: dot-separated labels of alphanumerics and
/// hyphens, at least two labels, no label starting or ending with '-'
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern("domain cannot be empty".to_string()));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(ConfigError::InvalidPattern(format!(
            "domain '{}' must have at least two labels (e.g. 'example.com')",
            domain
        )));
    }

    let bad_label = labels.iter().find(|label| {
        label.is_empty()
            || label.starts_with('-')
            || label.ends_with('-')
            || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if let Some(label) = bad_label {
        return Err(ConfigError::InvalidPattern(format!(
            "domain '{}' has an invalid label '{}' (expected a bare host, no scheme or path)",
            domain, label
        )));
    }

    Ok(())
}

/// Checks `email` has the shape `local@host.tld`
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let well_formed = match email.split_once('@') {
        Some((local, host)) => {
            !local.is_empty() && !host.contains('@') && host.contains('.') && !host.ends_with('.')
        }
        None => false,
    };

    if !well_formed {
        return Err(ConfigError::Validation(format!(
            "contact_email '{}' is not an email address",
            email
        )));
    }
    Ok(())
}
