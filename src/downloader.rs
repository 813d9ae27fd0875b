//! Single-image download: fetch, sniff, hash, dedup, write.
//!
//! Every candidate URL goes through [`ImageDownloader::download`], which never
//! returns an error: each failure mode is folded into a [`DownloadOutcome`] so a
//! single bad URL cannot abort the run.

use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::tracker::Tracker;
use crate::types::{DownloadOutcome, DownloadResult, DuplicateReason};
use crate::utils::{build_http_client, display_filename, lowercase_extension, write_atomic};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Abstraction over image body fetching, enabling testability.
#[async_trait::async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch the raw body at `url`
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

/// Production [`ImageSource`] issuing one HTTP GET per image
#[derive(Clone, Debug)]
pub struct HttpImageSource {
    http_client: reqwest::Client,
}

impl HttpImageSource {
    /// Create an image source using the configured User-Agent and timeout
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_client(build_http_client(config)?))
    }

    /// Create an image source around an existing HTTP client
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait::async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_send(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_body(url, e))?;
        Ok(body.to_vec())
    }
}

/// Identify the image format of `body` from its magic bytes
///
/// The URL extension and HTTP content type are never consulted.
pub fn sniff_image_format(body: &[u8]) -> Option<image::ImageFormat> {
    image::guess_format(body).ok()
}

/// Lowercase hex MD5 of `body`
pub fn content_hash(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

/// Downloads candidate URLs into one destination directory
///
/// Cloning is cheap; clones share the image source, tracker and gate.
#[derive(Clone)]
pub struct ImageDownloader {
    source: Arc<dyn ImageSource>,
    dest_dir: PathBuf,
    tracker: Arc<Tracker>,
    /// Bounds the number of downloads performing network I/O at once
    gate: Arc<Semaphore>,
    writes: TaskTracker,
}

impl ImageDownloader {
    /// Create a downloader
    ///
    /// `gate` is shared with any other downloader that should count against the
    /// same concurrency limit.
    pub fn new(
        source: Arc<dyn ImageSource>,
        dest_dir: impl Into<PathBuf>,
        tracker: Arc<Tracker>,
        gate: Arc<Semaphore>,
    ) -> Self {
        Self {
            source,
            dest_dir: dest_dir.into(),
            tracker,
            gate,
            writes: TaskTracker::new(),
        }
    }

    /// Directory images are written into
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// The shared tracker
    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Attempt one candidate URL
    ///
    /// 1. Wait for a gate slot, held until this call returns. A URL that was
    ///    already tried is skipped without waiting.
    /// 2. Mark the URL tried before any network I/O, so a download cut short
    ///    mid-fetch is never retried. URLs still waiting for a slot stay unmarked.
    /// 3. Fetch the body and reject anything that is not a recognized image.
    /// 4. Skip if the body's hash was saved before; otherwise claim the hash and
    ///    write `<dest_dir>/<hash><lowercased URL extension>`.
    pub async fn download(&self, url: &str) -> DownloadResult {
        let display_name = display_filename(url);
        let outcome = self.attempt(url, &display_name).await;
        DownloadResult {
            url: url.to_string(),
            display_name,
            outcome,
        }
    }

    async fn attempt(&self, url: &str, display_name: &str) -> DownloadOutcome {
        // Early skip without queueing on the gate; the mark itself happens below
        if self.tracker.already_tried(url).await {
            info!(url = %url, "SKIP: {} was already tried", display_name);
            return DownloadOutcome::SkippedDuplicate(DuplicateReason::AlreadyTried);
        }

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(url = %url, "FAIL: {} abandoned, download gate closed", display_name);
                return DownloadOutcome::FetchError(FetchError::Request {
                    url: url.to_string(),
                    reason: "download gate closed".to_string(),
                });
            }
        };

        if !self.tracker.record_attempt(url).await {
            info!(url = %url, "SKIP: {} was already tried", display_name);
            return DownloadOutcome::SkippedDuplicate(DuplicateReason::AlreadyTried);
        }

        let body = match self.source.fetch(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    url = %url,
                    error = %e,
                    code = e.error_code(),
                    "FAIL: {} could not be fetched",
                    display_name
                );
                return DownloadOutcome::FetchError(e);
            }
        };

        let Some(format) = sniff_image_format(&body) else {
            info!(url = %url, bytes = body.len(), "FAIL: Invalid image {} (not saving)", display_name);
            return DownloadOutcome::InvalidContent;
        };

        // Runs detached from this future: aborting the download must not leave a
        // claimed hash without its file.
        let commit = self.writes.spawn(commit_image(
            self.tracker.clone(),
            self.dest_dir.clone(),
            url.to_string(),
            display_name.to_string(),
            body,
            format,
        ));
        match commit.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(url = %url, error = %e, "FAIL: {} write task failed", display_name);
                DownloadOutcome::WriteError {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Wait until every image write already started has finished
    ///
    /// Writes outlive an aborted download task, so callers persisting tracker
    /// state after an abort wait here first.
    pub async fn wait_for_writes(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}

/// Claim the content hash, write the file, and release the claim on failure
async fn commit_image(
    tracker: Arc<Tracker>,
    dest_dir: PathBuf,
    url: String,
    display_name: String,
    body: Vec<u8>,
    format: image::ImageFormat,
) -> DownloadOutcome {
    let hash = content_hash(&body);
    if let Some(existing) = tracker.record_saved(&hash, &display_name).await {
        info!(
            url = %url,
            hash = %hash,
            "SKIP: Image {} is a duplicate of {} (not saving)",
            display_name,
            existing
        );
        return DownloadOutcome::SkippedDuplicate(DuplicateReason::SameContent { hash, existing });
    }

    let saved_name = format!("{}{}", hash, lowercase_extension(&display_name));
    let path = dest_dir.join(&saved_name);
    if let Err(e) = write_atomic(&path, &body).await {
        tracker.forget_hash(&hash).await;
        warn!(
            url = %url,
            path = %path.display(),
            error = %e,
            "FAIL: {} could not be written",
            display_name
        );
        return DownloadOutcome::WriteError {
            reason: e.to_string(),
        };
    }

    info!(
        url = %url,
        format = ?format,
        bytes = body.len(),
        "OK: Image {} from {}",
        saved_name,
        display_name
    );
    DownloadOutcome::Saved { hash, path }
}
