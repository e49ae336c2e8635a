//! HTTP access to the site.
//!
//! A single [`SiteClient`] is built at startup and shared by reference;
//! it owns the connection pool, the cookie session and the site headers.

use crate::config::SiteConfig;
use crate::error::{FetchError, ScraperError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Moves a remote resource into an open file.
///
/// Implemented by [`SiteClient`]; the fetch executor only depends on this
/// seam so transfers can be substituted.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Streams `url` into `file`, returning the number of bytes written.
    async fn download(&self, url: &str, file: &mut tokio::fs::File) -> Result<u64, FetchError>;
}

/// Site HTTP client with headers, session and request pacing.
#[derive(Debug, Clone)]
pub struct SiteClient {
    client: reqwest::Client,
    base_url: String,
    delay_sec: f64,
}

impl SiteClient {
    /// Creates a client for the configured mirror.
    pub fn new(config: &SiteConfig) -> Result<Self, ScraperError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| ScraperError::InvalidUrl(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ko-KR,ko;q=0.9"));
        if let Ok(referer) = HeaderValue::from_str(&format!("{}/", base_url)) {
            headers.insert(REFERER, referer);
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            delay_sec: config.delay_between_requests_sec,
        })
    }

    /// Returns the mirror base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds an absolute URL for a site path such as a comic identifier.
    pub fn site_url(&self, path: &str) -> String {
        resolve_url(&self.base_url, path)
    }

    /// Fetches a document and returns its body text.
    pub async fn get_text(&self, url: &str) -> Result<String, ScraperError> {
        rate_limit(self.delay_sec).await;
        tracing::debug!(url, "fetching document");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::Status {
                url: url.to_string(),
                status,
            });
        }

        Ok(response.text().await?)
    }

    /// Returns true if `url` answers with a success status.
    pub async fn is_reachable(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url, error = %e, "mirror unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl Transport for SiteClient {
    async fn download(&self, url: &str, file: &mut tokio::fs::File) -> Result<u64, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Resolves a possibly relative site URL against the mirror base.
pub fn resolve_url(base: &str, relative: &str) -> String {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return relative.to_string();
    }

    if let Some(rest) = relative.strip_prefix("//") {
        return format!("https://{}", rest);
    }

    let base = base.trim_end_matches('/');
    format!("{}/{}", base, relative.trim_start_matches('/'))
}

/// Applies rate limiting delay.
pub async fn rate_limit(delay_sec: f64) {
    if delay_sec > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(delay_sec)).await;
    }
}
