//! Core types for bingscraper

use crate::error::FetchError;
use std::path::PathBuf;

/// One page of search results to request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchPage {
    /// Search query
    pub query: String,
    /// Index of the first result on this page
    pub offset: usize,
    /// Provider adult content filter (true = filter on)
    pub adult_filter: bool,
    /// Free-form filters sent as the `qft` parameter
    pub extra_filters: String,
}

impl SearchPage {
    /// Create a page request for `query` starting at `offset`
    pub fn new(query: impl Into<String>, offset: usize) -> Self {
        Self {
            query: query.into(),
            offset,
            adult_filter: true,
            extra_filters: String::new(),
        }
    }
}

/// Why a URL was not downloaded again
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplicateReason {
    /// The URL was attempted before, in this run or a previous one
    AlreadyTried,
    /// The body hashes to content that was already saved
    SameContent {
        /// MD5 of the body
        hash: String,
        /// Original filename recorded for the first save of this content
        existing: String,
    },
}

/// Outcome of one download attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// New image content written to disk
    Saved {
        /// MD5 of the body, also the saved file stem
        hash: String,
        /// Where the image was written
        path: PathBuf,
    },
    /// Nothing written, the URL or its content is already known
    SkippedDuplicate(DuplicateReason),
    /// The body is not a recognized image format
    InvalidContent,
    /// The image could not be fetched
    FetchError(FetchError),
    /// The image was new but could not be written
    WriteError {
        /// Underlying I/O error message
        reason: String,
    },
}

impl DownloadOutcome {
    /// Stable tag for log lines and summaries
    pub fn tag(&self) -> &'static str {
        match self {
            DownloadOutcome::Saved { .. } => "saved",
            DownloadOutcome::SkippedDuplicate(_) => "skipped-duplicate",
            DownloadOutcome::InvalidContent => "invalid-content",
            DownloadOutcome::FetchError(_) => "fetch-error",
            DownloadOutcome::WriteError { .. } => "write-error",
        }
    }
}

/// Result of attempting one candidate URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadResult {
    /// The candidate URL
    pub url: String,
    /// Last path segment of the URL, used in logs and the hash table
    pub display_name: String,
    /// What happened
    pub outcome: DownloadOutcome,
}

impl DownloadResult {
    /// Whether new content was written
    pub fn is_saved(&self) -> bool {
        matches!(self.outcome, DownloadOutcome::Saved { .. })
    }
}

/// Why a run stopped requesting pages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The result offset reached the configured limit
    LimitReached,
    /// The provider returned consecutive empty pages
    Exhausted,
    /// An interrupt signal arrived
    Interrupted,
}

/// Per-outcome download counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DownloadCounts {
    /// Images written
    pub saved: usize,
    /// URLs or content already known
    pub skipped: usize,
    /// Bodies that were not images
    pub invalid: usize,
    /// Fetch or write failures
    pub failed: usize,
}

impl DownloadCounts {
    /// Count one outcome
    pub fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Saved { .. } => self.saved += 1,
            DownloadOutcome::SkippedDuplicate(_) => self.skipped += 1,
            DownloadOutcome::InvalidContent => self.invalid += 1,
            DownloadOutcome::FetchError(_) | DownloadOutcome::WriteError { .. } => {
                self.failed += 1
            }
        }
    }

    /// Number of outcomes counted
    pub fn total(&self) -> usize {
        self.saved + self.skipped + self.invalid + self.failed
    }
}

/// Summary of a finished run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Search pages requested (including failed requests)
    pub pages_fetched: usize,
    /// Candidate URLs handed to the downloader
    pub urls_dispatched: usize,
    /// Outcomes of downloads that completed before the run ended
    ///
    /// Downloads abandoned by an interrupt are not counted.
    pub counts: DownloadCounts,
    /// Why the run stopped
    pub stop_reason: StopReason,
}
