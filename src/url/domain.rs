use url::Url;

/// Lowercased host of `url`, without the port
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Checks whether `host` belongs to the crawled `domain`
///
/// With `include_subdomains`, "blog.example.com" matches "example.com";
/// otherwise only the exact host does. Both sides are expected in lowercase.
///
/// # Examples
///
/// ```
/// use shoal::url::host_matches;
///
/// assert!(host_matches("example.com", "example.com", false));
/// assert!(!host_matches("blog.example.com", "example.com", false));
/// assert!(host_matches("blog.example.com", "example.com", true));
/// assert!(!host_matches("myexample.com", "example.com", true));
/// ```
pub fn host_matches(host: &str, domain: &str, include_subdomains: bool) -> bool {
    if host == domain {
        return true;
    }

    include_subdomains
        && host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}
