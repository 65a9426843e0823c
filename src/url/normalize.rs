use crate::UrlError;
use url::Url;

/// Schemes the crawler can fetch
const FETCHABLE_SCHEMES: &[&str] = &["http", "https"];

/// Parses the entry URL of a crawl
///
/// # Arguments
///
/// * `url_str` - The URL string given by the caller
///
/// # Returns
///
/// * `Ok(Url)` - Absolute http(s) URL with a host
/// * `Err(UrlError)` - Malformed, relative, non-http or host-less URL
///
/// # Examples
///
/// ```
/// use treecrawl::url::parse_entry_url;
///
/// let url = parse_entry_url("https://example.com/list?page=2").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
/// assert!(parse_entry_url("/relative/path").is_err());
/// ```
pub fn parse_entry_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if !FETCHABLE_SCHEMES.contains(&url.scheme()) {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}

/// Resolves an extracted link value against the URL of its page
///
/// Returns `None` when the value is blank or resolves to something the
/// crawler cannot fetch (`javascript:`, `mailto:`, `data:` and the like).
/// Fragments are dropped.
///
/// # Examples
///
/// ```
/// use treecrawl::url::resolve_link;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/posts/").unwrap();
/// let link = resolve_link(&base, "../img/a.png#top").unwrap();
/// assert_eq!(link.as_str(), "https://example.com/img/a.png");
/// assert!(resolve_link(&base, "javascript:void(0)").is_none());
/// ```
pub fn resolve_link(base: &Url, value: &str) -> Option<Url> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let mut url = base.join(value).ok()?;
    if !FETCHABLE_SCHEMES.contains(&url.scheme()) || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);

    Some(url)
}
