//! Configuration types for bingscraper

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User-Agent sent with every request; some providers reject default client identifiers
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Fedora; Linux x86_64; rv:60.0) Gecko/20100101 Firefox/60.0";

/// Main configuration for a scrape run
///
/// Every field has a serde default, so a JSON config file only needs to name
/// the settings it changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Search query (required, must not be blank)
    #[serde(default)]
    pub query: String,

    /// Root directory for saved images (default: "./images/")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Stop once this many results have been requested (default: 100)
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Maximum simultaneous image downloads (default: 20)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Provider adult content filter (default: true = filter on)
    #[serde(default = "default_true")]
    pub adult_filter: bool,

    /// Query based filters appended to every search, e.g. `+filterui:license-L1`
    #[serde(default)]
    pub filters: String,

    /// Directory holding `tried_urls.txt` and `image_md5s.tsv` (default: "./.bingscraper")
    #[serde(default = "default_tracker_dir")]
    pub tracker_dir: PathBuf,

    /// Scheme and host of the image search provider (default: "https://www.bing.com")
    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,

    /// Connect and read timeout applied to every request (default: 2 seconds)
    #[serde(default = "default_request_timeout", with = "duration_secs_serde")]
    pub request_timeout: Duration,

    /// Pause after dispatching a page of downloads (default: 100 milliseconds)
    #[serde(default = "default_page_pause", with = "duration_millis_serde")]
    pub page_pause: Duration,

    /// Consecutive empty pages after which results are considered exhausted (default: 2)
    #[serde(default = "default_max_empty_pages")]
    pub max_empty_pages: usize,

    /// User-Agent header for search and image requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            query: String::new(),
            output_dir: default_output_dir(),
            limit: default_limit(),
            threads: default_threads(),
            adult_filter: true,
            filters: String::new(),
            tracker_dir: default_tracker_dir(),
            search_base_url: default_search_base_url(),
            request_timeout: default_request_timeout(),
            page_pause: default_page_pause(),
            max_empty_pages: default_max_empty_pages(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Create a configuration for `query` with every other setting at its default
    pub fn for_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json(&content)
    }

    /// Directory images for this query are saved into
    ///
    /// `<output_dir>/<query with spaces replaced by underscores>`
    pub fn destination_dir(&self) -> PathBuf {
        self.output_dir.join(self.query.replace(' ', "_"))
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::config("query", "search query must not be empty"));
        }
        if self.threads == 0 {
            return Err(Error::config("threads", "thread count must be at least 1"));
        }
        if self.max_empty_pages == 0 {
            return Err(Error::config(
                "max_empty_pages",
                "empty page threshold must be at least 1",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config(
                "request_timeout",
                "request timeout must be greater than zero",
            ));
        }
        url::Url::parse(&self.search_base_url).map_err(|e| {
            Error::config(
                "search_base_url",
                format!("invalid search base URL '{}': {}", self.search_base_url, e),
            )
        })?;
        Ok(())
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./images/")
}

fn default_limit() -> usize {
    100
}

fn default_threads() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_tracker_dir() -> PathBuf {
    PathBuf::from("./.bingscraper")
}

fn default_search_base_url() -> String {
    "https://www.bing.com".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_page_pause() -> Duration {
    Duration::from_millis(100)
}

fn default_max_empty_pages() -> usize {
    2
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

// Duration serialization helper (whole seconds)
mod duration_secs_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
