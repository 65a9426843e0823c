//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the shared HTTP client
//! - Composing request headers (user agent, cookie, configured headers)
//! - GET requests for pages and resources
//! - Error classification for the retry policy

use crate::config::{CrawlOptions, RequestOptions, UserAgents};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use reqwest::{redirect::Policy, Client, Response};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// User agents picked from when none is configured
const COMMON_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// Content types accepted as HTML documents
const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Failure of a single request attempt
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Non-2xx response
    #[error("{reason}")]
    Status { code: u16, reason: String },

    /// Connection, timeout or body-read failure
    #[error("{0}")]
    Transient(String),

    /// The page is not an HTML document
    #[error("expect content type to be html-type, but got 'content-type': {0}")]
    NotHtml(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Returns true if another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Transient(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
            FetchError::Transient(e.to_string())
        } else {
            FetchError::Other(e.to_string())
        }
    }
}

/// Effective request settings of one task
///
/// Rule settings win over group settings, which win over the global options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestProfile {
    pub request: RequestOptions,
    pub user_agents: Option<UserAgents>,
    pub cookie: Option<String>,
}

/// A fetched HTML document
#[derive(Debug)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: Url,
    pub content_type: String,
    pub body: String,
}

/// Builds the HTTP client shared by every request of a crawl
///
/// # Arguments
///
/// * `options` - The crawl options; `request.timeout-ms` sets the default timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use treecrawl::CrawlOptions;
/// use treecrawl::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlOptions::default()).unwrap();
/// ```
pub fn build_http_client(options: &CrawlOptions) -> Result<Client, reqwest::Error> {
    let timeout = options.request.timeout_ms.unwrap_or(30_000);

    Client::builder()
        .timeout(Duration::from_millis(timeout))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Builds the headers of one request
///
/// Configured headers are applied first. A `User-Agent` is added unless
/// configured, picked at random from `user_agents` or from a built-in list
/// of common browsers. The cookie is added unless a `Cookie` header is set.
pub fn compose_headers(profile: &RequestProfile) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &profile.request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::Other(format!("invalid header name `{}`: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::Other(format!("invalid value for header `{}`: {}", name, e)))?;
        headers.insert(name, value);
    }

    if !headers.contains_key(USER_AGENT) {
        let agent = pick_user_agent(profile.user_agents.as_ref());
        let value = HeaderValue::from_str(&agent)
            .map_err(|e| FetchError::Other(format!("invalid user agent `{}`: {}", agent, e)))?;
        headers.insert(USER_AGENT, value);
    }

    if let Some(cookie) = &profile.cookie {
        if !headers.contains_key(COOKIE) {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| FetchError::Other(format!("invalid cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }
    }

    Ok(headers)
}

fn pick_user_agent(agents: Option<&UserAgents>) -> String {
    let configured = agents.map(UserAgents::to_vec).unwrap_or_default();
    let mut rng = rand::rng();
    if configured.is_empty() {
        COMMON_USER_AGENTS[rng.random_range(0..COMMON_USER_AGENTS.len())].to_string()
    } else {
        configured[rng.random_range(0..configured.len())].clone()
    }
}

/// Sends a GET request
///
/// # Returns
///
/// * `Ok(Response)` - 2xx response, body not yet read
/// * `Err(FetchError)` - Non-2xx status or network failure
pub async fn fetch(client: &Client, url: &Url, profile: &RequestProfile) -> Result<Response, FetchError> {
    let headers = compose_headers(profile)?;
    let mut request = client.get(url.clone()).headers(headers);
    if let Some(ms) = profile.request.timeout_ms {
        request = request.timeout(Duration::from_millis(ms));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            code: status.as_u16(),
            reason: status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string(),
        });
    }

    Ok(response)
}

/// Fetches an HTML page
///
/// Fails with [`FetchError::NotHtml`] if the response is not an HTML
/// document.
pub async fn fetch_page(
    client: &Client,
    url: &Url,
    profile: &RequestProfile,
) -> Result<FetchedPage, FetchError> {
    let response = fetch(client, url, profile).await?;
    let content_type = content_type(&response);
    if !is_html(&content_type) {
        return Err(FetchError::NotHtml(content_type));
    }

    let url = response.url().clone();
    let body = response.text().await?;
    Ok(FetchedPage {
        url,
        content_type,
        body,
    })
}

/// The `Content-Type` header of a response, or an empty string
pub fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Returns true if the content type names an HTML document
pub fn is_html(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    HTML_CONTENT_TYPES.contains(&essence.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile() -> RequestProfile {
        RequestProfile {
            request: RequestOptions::default().header("x-test", "1"),
            user_agents: Some(UserAgents::from("TestAgent/1.0")),
            cookie: Some("session=abc".to_string()),
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&CrawlOptions::default()).is_ok());
    }

    #[test]
    fn test_compose_headers() {
        let headers = compose_headers(&profile()).unwrap();
        assert_eq!(headers[USER_AGENT], "TestAgent/1.0");
        assert_eq!(headers[COOKIE], "session=abc");
        assert_eq!(headers["x-test"], "1");
    }

    #[test]
    fn test_configured_headers_win() {
        let mut profile = profile();
        profile.request = RequestOptions::default()
            .header("User-Agent", "Explicit/2.0")
            .header("Cookie", "explicit=1");
        let headers = compose_headers(&profile).unwrap();
        assert_eq!(headers[USER_AGENT], "Explicit/2.0");
        assert_eq!(headers[COOKIE], "explicit=1");
    }

    #[test]
    fn test_random_user_agent_from_list() {
        let agents = vec!["A/1", "B/1", "C/1"];
        let profile = RequestProfile {
            user_agents: Some(UserAgents::from(agents.clone())),
            ..Default::default()
        };
        for _ in 0..20 {
            let headers = compose_headers(&profile).unwrap();
            let agent = headers[USER_AGENT].to_str().unwrap();
            assert!(agents.contains(&agent));
        }
    }

    #[test]
    fn test_builtin_user_agent() {
        let headers = compose_headers(&RequestProfile::default()).unwrap();
        let agent = headers[USER_AGENT].to_str().unwrap();
        assert!(COMMON_USER_AGENTS.contains(&agent));
        assert!(!headers.contains_key(COOKIE));
    }

    #[test]
    fn test_invalid_header_name() {
        let profile = RequestProfile {
            request: RequestOptions::default().header("bad header", "x"),
            ..Default::default()
        };
        assert!(matches!(compose_headers(&profile), Err(FetchError::Other(_))));
    }

    #[test]
    fn test_is_html() {
        assert!(is_html("text/html"));
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("Text/HTML"));
        assert!(is_html("application/xhtml+xml"));
        assert!(!is_html("application/json"));
        assert!(!is_html("image/png"));
        assert!(!is_html(""));
    }

    #[test]
    fn test_retryable_errors() {
        let status = FetchError::Status {
            code: 503,
            reason: "Service Unavailable".to_string(),
        };
        assert!(status.is_retryable());
        assert!(FetchError::Transient("timeout".to_string()).is_retryable());
        assert!(!FetchError::NotHtml("image/png".to_string()).is_retryable());
        assert!(!FetchError::Other("bad".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_page_sends_profile_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("user-agent", "TestAgent/1.0"))
            .and(header("cookie", "session=abc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<title>Hi</title>", "text/html"),
            )
            .mount(&server)
            .await;

        let client = build_http_client(&CrawlOptions::default()).unwrap();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let page = fetch_page(&client, &url, &profile()).await.unwrap();
        assert_eq!(page.body, "<title>Hi</title>");
        assert_eq!(page.content_type, "text/html");
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = build_http_client(&CrawlOptions::default()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = fetch(&client, &url, &RequestProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { code: 404, .. }));
        assert_eq!(err.to_string(), "Not Found");
    }

    #[tokio::test]
    async fn test_fetch_page_rejects_non_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&server)
            .await;

        let client = build_http_client(&CrawlOptions::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = fetch_page(&client, &url, &RequestProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotHtml(ref ct) if ct == "application/json"));
    }
}
