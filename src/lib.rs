//! # bingscraper
//!
//! Bulk image downloader for a web image-search provider.
//!
//! Given a query, the scraper walks the provider's paginated results, extracts
//! the full-size image URLs, and downloads them concurrently into a directory
//! named after the query. Two kinds of state survive across runs:
//! - every URL ever attempted, so no URL is fetched twice,
//! - the content hash of every saved image, so identical bytes from different
//!   URLs are stored once.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bingscraper::{Config, Scraper, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::for_query("red pandas");
//!     config.limit = 70;
//!
//!     let scraper = Scraper::new(config).await?;
//!     let summary = run_with_shutdown(&scraper).await?;
//!     println!("saved {} images", summary.counts.saved);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Run coordination
pub mod coordinator;
/// Single image download pipeline
pub mod downloader;
/// Error types
pub mod error;
/// Results page client
pub mod search;
/// Persistent URL and content-hash tracking
pub mod tracker;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

pub use config::Config;
pub use coordinator::Scraper;
pub use downloader::{HttpImageSource, ImageDownloader, ImageSource};
pub use error::{Error, FetchError, PersistenceError, Result};
pub use search::SearchClient;
pub use tracker::{Tracker, TrackerSnapshot};
pub use types::{DownloadCounts, DownloadOutcome, DownloadResult, RunSummary, StopReason};

use tokio_util::sync::CancellationToken;

/// Return a token that is cancelled when the process receives SIGTERM or SIGINT
///
/// The listener runs on a background task; the token can be passed straight to
/// [`Scraper::run`].
pub fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });
    token
}

/// Run `scraper` until it finishes or SIGTERM/SIGINT arrives
///
/// On a signal, in-flight downloads are abandoned and the tracker is persisted
/// before returning.
///
/// # Errors
///
/// Returns an error if tracker state cannot be persisted.
pub async fn run_with_shutdown(scraper: &Scraper) -> Result<RunSummary> {
    scraper.run(cancel_on_signal()).await
}

/// Wait for SIGTERM or SIGINT
///
/// Falls back to `tokio::signal::ctrl_c` when neither handler can be installed.
/// Never returns if no listener at all can be installed.
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut terminate), Ok(mut interrupt)) => {
            let name = tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "Stopping scrape");
        }
        (Ok(mut installed), Err(e)) | (Err(e), Ok(mut installed)) => {
            tracing::warn!(error = %e, "Only one shutdown signal handler could be installed");
            installed.recv().await;
            tracing::info!("Stopping scrape");
        }
        (Err(e), Err(_)) => {
            tracing::warn!(error = %e, "No shutdown signal handler installed, listening for Ctrl+C");
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!(signal = "ctrl-c", "Stopping scrape"),
                Err(e) => {
                    tracing::error!(error = %e, "Ctrl+C listener failed, scrape will run to completion");
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl-c", "Stopping scrape"),
        Err(e) => {
            tracing::error!(error = %e, "Ctrl+C listener failed, scrape will run to completion");
            std::future::pending::<()>().await;
        }
    }
}
