//! Outbound upstream requests.
//!
//! One [`Fetcher`] is shared by every request; it holds the pooled
//! `reqwest::Client` and nothing per-request, so calls never interfere.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap};
use streamrelay_common::{Error, Result};
use url::Url;

use crate::config::UpstreamConfig;

/// Upstream body as a stream of chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Trim a URL for log fields.
pub fn truncate_url(url: &str) -> &str {
    match url.char_indices().nth(80) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}

/// What the relay needs from an upstream response head.
///
/// The body travels separately as a [`BodyStream`], so this stays plain
/// data that handlers can borrow across awaits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    /// URL after redirects; the base for manifest resolution.
    pub final_url: Url,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub accept_ranges: Option<String>,
}

impl UpstreamResponse {
    /// A bare response head with no optional headers.
    pub fn new(status: u16, final_url: Url) -> Self {
        Self {
            status,
            final_url,
            content_type: None,
            content_length: None,
            content_range: None,
            accept_ranges: None,
        }
    }

    fn from_reqwest(response: reqwest::Response) -> (Self, BodyStream) {
        let headers = response.headers();
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let head = Self {
            status: response.status().as_u16(),
            final_url: response.url().clone(),
            content_type: text(header::CONTENT_TYPE),
            content_length: text(header::CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
            content_range: text(header::CONTENT_RANGE),
            accept_ranges: text(header::ACCEPT_RANGES),
        };

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .boxed();

        (head, body)
    }
}

/// Issues upstream requests with header spoofing and 5xx retry.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl Fetcher {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Fetch a stream URL, forwarding the inbound `Range` verbatim.
    pub async fn fetch(
        &self,
        url: &str,
        range: Option<&str>,
    ) -> Result<(UpstreamResponse, BodyStream)> {
        let parsed = parse_upstream_url(url)?;
        let headers = self.stream_headers(&parsed, range);
        self.send(url, parsed, headers).await
    }

    /// Fetch an image for the logo proxy. Only `User-Agent` and `Accept`
    /// are sent.
    pub async fn fetch_image(&self, url: &str) -> Result<(UpstreamResponse, BodyStream)> {
        let parsed = parse_upstream_url(url)?;
        let headers = self.image_headers();
        self.send(url, parsed, headers).await
    }

    async fn send(
        &self,
        url: &str,
        parsed: Url,
        headers: HeaderMap,
    ) -> Result<(UpstreamResponse, BodyStream)> {
        let attempts = self.config.attempts();
        let mut attempt = 1;

        loop {
            let response = self
                .client
                .get(parsed.clone())
                .headers(headers.clone())
                .send()
                .await
                .map_err(|e| {
                    tracing::warn!(url = %truncate_url(url), attempt, error = %e, "Upstream request failed");
                    Error::unreachable(truncate_url(url), e.to_string())
                })?;

            let status = response.status();

            if status.is_server_error() && attempt < attempts {
                tracing::info!(
                    url = %truncate_url(url),
                    attempt,
                    status = status.as_u16(),
                    "Upstream 5xx, retrying in {}ms",
                    self.config.retry_delay_ms
                );
                tokio::time::sleep(self.config.retry_delay()).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                tracing::warn!(
                    url = %truncate_url(url),
                    attempt,
                    status = status.as_u16(),
                    "Upstream rejected request"
                );
                let reason = status.canonical_reason().unwrap_or("upstream error");
                return Err(Error::rejected(
                    status.as_u16(),
                    format!("Failed to fetch stream: {reason}"),
                ));
            }

            tracing::debug!(url = %truncate_url(url), attempt, status = status.as_u16(), "Upstream responded");
            return Ok(UpstreamResponse::from_reqwest(response));
        }
    }

    fn image_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = header::HeaderValue::from_str(&self.config.user_agent) {
            headers.insert(header::USER_AGENT, ua);
        }
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("image/*,*/*;q=0.8"),
        );
        headers
    }

    fn stream_headers(&self, url: &Url, range: Option<&str>) -> HeaderMap {
        let (origin, referer) = match self
            .config
            .origin_overrides
            .iter()
            .find(|rule| rule.matches(url.as_str()))
        {
            Some(rule) => (rule.origin.clone(), rule.referer()),
            None => {
                let origin = url.origin().ascii_serialization();
                let referer = format!("{origin}/");
                (origin, referer)
            }
        };

        let mut headers = HeaderMap::new();
        let mut set = |name: header::HeaderName, value: &str| {
            if let Ok(v) = header::HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };

        set(header::USER_AGENT, &self.config.user_agent);
        set(header::ACCEPT, "*/*");
        set(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9");
        set(header::ORIGIN, &origin);
        set(header::REFERER, &referer);
        if let Some(range) = range {
            set(header::RANGE, range);
        }

        headers
    }
}

/// Accept only absolute http(s) URLs.
pub fn parse_upstream_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| Error::Validation(format!("Invalid URL {url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Error::Validation(format!("Unsupported URL scheme: {other}"))),
    }
}
