use crate::UrlError;
use url::form_urlencoded;
use url::Url;

/// Query keys that only carry campaign or click tracking
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Resolves `raw` against `base` and normalizes the result
///
/// Returns `None` for anything that is not a crawlable http(s) URL:
/// malformed input, `mailto:`/`javascript:`/`data:` targets, or URLs
/// without a host. Pure; calling it again on its own output returns the
/// same URL.
///
/// # Examples
///
/// ```
/// use shoal::url::normalize;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/blog/").unwrap();
/// let url = normalize("../about/#team", Some(&base)).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/about");
/// ```
pub fn normalize(raw: &str, base: Option<&Url>) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let resolved = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };

    normalize_url(resolved.as_str()).ok()
}

/// Canonicalizes an absolute http(s) URL
///
/// The URL parser already lowercases scheme and host and drops default
/// ports. On top of that, credentials and the fragment are removed, dot
/// segments and repeated or trailing slashes are collapsed (the root stays
/// `/`), tracking parameters (`utm_*`, `fbclid`, ...) are dropped and the
/// remaining query pairs are sorted by key and re-encoded.
///
/// # Examples
///
/// ```
/// use shoal::url::normalize_url;
///
/// let url = normalize_url("HTTPS://EXAMPLE.COM:443/page/").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingDomain),
    }

    if !url.username().is_empty() || url.password().is_some() {
        url.set_username("")
            .map_err(|_| UrlError::Malformed("cannot strip credentials".to_string()))?;
        url.set_password(None)
            .map_err(|_| UrlError::Malformed("cannot strip credentials".to_string()))?;
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let filtered_params = filter_and_sort_query_params(&url);

        if filtered_params.is_empty() {
            url.set_query(None);
        } else {
            let query_string = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(filtered_params.iter())
                .finish();
            url.set_query(Some(&query_string));
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            // Skip empty segments (from multiple slashes) and current directory markers
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    // Stable sort keeps repeated keys in their original order
    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
