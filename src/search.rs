//! Search result page fetching and result URL extraction.
//!
//! The provider's async results endpoint returns an HTML fragment in which each
//! result carries an HTML-escaped JSON blob like `murl&quot;:&quot;<url>&quot;`.
//! Extraction is a best-effort scrape: a body without matches is an empty page.

use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::types::SearchPage;
use crate::utils::build_http_client;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Number of results requested per page
pub const PAGE_SIZE: usize = 35;

#[allow(clippy::expect_used)]
static MEDIA_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"murl&quot;:&quot;(.*?)&quot;").expect("media URL pattern is valid")
});

/// Extract candidate image URLs from a results page body, in page order
pub fn extract_image_urls(html: &str) -> Vec<String> {
    MEDIA_URL_PATTERN
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

/// Client for the provider's paginated image results endpoint
#[derive(Clone, Debug)]
pub struct SearchClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl SearchClient {
    /// Create a search client using the configured provider, User-Agent and timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_client(
            build_http_client(config)?,
            &config.search_base_url,
        ))
    }

    /// Create a search client around an existing HTTP client
    pub fn with_client(http_client: reqwest::Client, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the request URL for `page`
    ///
    /// The query is form-encoded; the extra filters are passed through verbatim
    /// because provider filter syntax (`+filterui:...`) relies on raw `+` and `:`.
    pub fn request_url(&self, page: &SearchPage) -> String {
        let query: String = url::form_urlencoded::byte_serialize(page.query.as_bytes()).collect();
        format!(
            "{base}/images/async?q={query}&first={offset}&count={count}&adlt={adult}&qft={filters}",
            base = self.base_url,
            query = query,
            offset = page.offset,
            count = PAGE_SIZE,
            adult = if page.adult_filter { "" } else { "off" },
            filters = page.extra_filters,
        )
    }

    /// Request one page of results and extract its candidate URLs
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on network failure, timeout, or a non-success
    /// HTTP status. A body without recognizable results is an empty page.
    pub async fn fetch_page(&self, page: &SearchPage) -> std::result::Result<Vec<String>, FetchError> {
        let request_url = self.request_url(page);
        info!(url = %request_url, offset = page.offset, "Requesting results page");

        let response = self
            .http_client
            .get(&request_url)
            .send()
            .await
            .map_err(|e| FetchError::from_send(&request_url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: request_url,
                status: response.status().as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| FetchError::from_body(&request_url, e))?;

        let urls = extract_image_urls(&html);
        debug!(offset = page.offset, count = urls.len(), "Extracted result URLs");
        Ok(urls)
    }
}
