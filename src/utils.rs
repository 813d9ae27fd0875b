//! Utility functions for HTTP clients, URL filenames and file writes

use crate::config::Config;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Build the HTTP client shared by page and image requests
///
/// Every request carries the configured browser User-Agent and is bounded by
/// the configured timeout, both for connecting and for the whole exchange.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.request_timeout)
        .timeout(config.request_timeout)
        .build()
        .map_err(Error::Network)
}

/// Extract a display filename from an image URL
///
/// Uses the last path segment with the query string stripped. This name is only
/// used for log lines and the hash table; saved files are named by content hash.
///
/// # Examples
///
/// ```
/// use bingscraper::utils::display_filename;
///
/// assert_eq!(display_filename("https://img.example/a/b/Cat.JPG?w=300"), "Cat.JPG");
/// ```
pub fn display_filename(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url) {
        if let Some(segment) = parsed_url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        {
            return segment.to_string();
        }
        if let Some(host) = parsed_url.host_str() {
            return host.to_string();
        }
    }

    // Not an absolute URL, fall back to plain string splitting
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(without_query)
        .to_string()
}

/// Lowercased extension of `filename` including the leading dot, or empty
///
/// Leading dots of hidden files do not count as an extension.
pub fn lowercase_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Write `contents` to `path` by writing a sibling temporary file and renaming it
///
/// Readers never observe a partially written file at `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_sibling(path);
    if let Err(e) = tokio::fs::write(&temp_path, contents).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Remove `.part` files left in `dir` by writes that never reached their rename
///
/// Returns how many were removed.
pub async fn remove_partial_files(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_partial = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(PARTIAL_SUFFIX));
        if is_partial && entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

const PARTIAL_SUFFIX: &str = ".part";

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}
