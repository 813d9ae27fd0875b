//! Run coordination: page loop, download dispatch, shutdown.
//!
//! The coordinator walks result offsets sequentially, spawning one task per
//! candidate URL. It never waits for a page's downloads before fetching the
//! next page; the downloader's gate is what bounds concurrency.
//!
//! A run ends in one of three ways:
//! - the offset reaches the configured limit,
//! - the provider returns `max_empty_pages` empty pages in a row,
//! - the cancellation token fires.
//!
//! On the first two, every dispatched download is awaited before the tracker
//! is persisted, so the saved hash table matches the files on disk. On
//! cancellation, in-flight downloads are aborted, writes that already started
//! are allowed to finish, and the tracker is persisted. URLs still queued on the
//! gate were never marked tried, so a later run picks them up again.

use crate::config::Config;
use crate::downloader::{HttpImageSource, ImageDownloader};
use crate::error::{Error, Result};
use crate::search::SearchClient;
use crate::tracker::Tracker;
use crate::types::{DownloadCounts, DownloadResult, RunSummary, SearchPage, StopReason};
use crate::utils::{build_http_client, remove_partial_files};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives one scrape run for a configured query
pub struct Scraper {
    config: Arc<Config>,
    search: SearchClient,
    downloader: ImageDownloader,
}

impl Scraper {
    /// Create a scraper for `config`
    ///
    /// This validates the configuration, creates the destination directory,
    /// loads tracker state from `tracker_dir`, and builds one HTTP client shared
    /// by page and image requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the destination
    /// directory cannot be created, or existing tracker state cannot be read.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let dest_dir = config.destination_dir();
        tokio::fs::create_dir_all(&dest_dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create destination directory '{}': {}",
                    dest_dir.display(),
                    e
                ),
            ))
        })?;

        match remove_partial_files(&dest_dir).await {
            Ok(0) => {}
            Ok(removed) => info!(dest = %dest_dir.display(), removed, "Removed unfinished image files"),
            Err(e) => warn!(dest = %dest_dir.display(), error = %e, "Could not scan for unfinished image files"),
        }

        let tracker = Arc::new(Tracker::load(&config.tracker_dir).await?);
        let http_client = build_http_client(&config)?;
        let search = SearchClient::with_client(http_client.clone(), &config.search_base_url);
        let downloader = ImageDownloader::new(
            Arc::new(HttpImageSource::with_client(http_client)),
            dest_dir,
            tracker,
            Arc::new(Semaphore::new(config.threads)),
        );

        Ok(Self::with_parts(config, search, downloader))
    }

    /// Assemble a scraper from already-built components
    pub fn with_parts(config: Config, search: SearchClient, downloader: ImageDownloader) -> Self {
        Self {
            config: Arc::new(config),
            search,
            downloader,
        }
    }

    /// The run configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared tracker
    pub fn tracker(&self) -> &Arc<Tracker> {
        self.downloader.tracker()
    }

    /// Run the page loop until the limit, exhaustion, or cancellation
    ///
    /// # Errors
    ///
    /// Only a failure to persist the tracker is returned; page and image
    /// failures are logged and counted.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let limit = self.config.limit;
        let mut tasks: JoinSet<DownloadResult> = JoinSet::new();
        let mut counts = DownloadCounts::default();
        let mut offset = 0usize;
        let mut empty_streak = 0usize;
        let mut pages_fetched = 0usize;
        let mut urls_dispatched = 0usize;

        info!(
            query = %self.config.query,
            limit,
            threads = self.config.threads,
            dest = %self.downloader.dest_dir().display(),
            "Starting scrape"
        );

        let mut stop_reason = loop {
            if offset >= limit {
                break StopReason::LimitReached;
            }
            if cancel.is_cancelled() {
                break StopReason::Interrupted;
            }

            let page = self.page_at(offset);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Interrupted,
                fetched = self.search.fetch_page(&page) => fetched,
            };
            pages_fetched += 1;

            let urls = match fetched {
                Ok(urls) => urls,
                Err(e) => {
                    warn!(
                        offset,
                        error = %e,
                        code = e.error_code(),
                        "Results page request failed"
                    );
                    Vec::new()
                }
            };

            if urls.is_empty() {
                empty_streak += 1;
                debug!(offset, empty_streak, "Empty results page");
                if empty_streak >= self.config.max_empty_pages {
                    info!(offset, "No more results from provider");
                    break StopReason::Exhausted;
                }
            } else {
                empty_streak = 0;
                let returned = urls.len();
                let remaining = limit.saturating_sub(offset);
                for url in urls.into_iter().take(remaining) {
                    let downloader = self.downloader.clone();
                    tasks.spawn(async move { downloader.download(&url).await });
                    urls_dispatched += 1;
                }
                offset += returned;
            }

            while let Some(joined) = tasks.try_join_next() {
                record_joined(&mut counts, joined);
            }

            if offset >= limit {
                continue;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Interrupted,
                _ = tokio::time::sleep(self.config.page_pause) => {}
            }
        };

        if stop_reason != StopReason::Interrupted {
            debug!(in_flight = tasks.len(), "Waiting for dispatched downloads");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        stop_reason = StopReason::Interrupted;
                        break;
                    }
                    joined = tasks.join_next() => match joined {
                        Some(joined) => record_joined(&mut counts, joined),
                        None => break,
                    },
                }
            }
        }

        if stop_reason == StopReason::Interrupted {
            while let Some(joined) = tasks.try_join_next() {
                record_joined(&mut counts, joined);
            }
            info!(
                abandoned = tasks.len(),
                "Interrupted, abandoning in-flight downloads and saving tracker state"
            );
            tasks.shutdown().await;
        }

        // Writes detach from their download task and may still be running
        self.downloader.wait_for_writes().await;
        self.tracker().persist(&self.config.tracker_dir).await?;

        let summary = RunSummary {
            pages_fetched,
            urls_dispatched,
            counts,
            stop_reason,
        };
        info!(
            pages = summary.pages_fetched,
            dispatched = summary.urls_dispatched,
            saved = summary.counts.saved,
            skipped = summary.counts.skipped,
            invalid = summary.counts.invalid,
            failed = summary.counts.failed,
            stop_reason = ?summary.stop_reason,
            "Scrape finished"
        );
        Ok(summary)
    }

    fn page_at(&self, offset: usize) -> SearchPage {
        SearchPage {
            query: self.config.query.clone(),
            offset,
            adult_filter: self.config.adult_filter,
            extra_filters: self.config.filters.clone(),
        }
    }
}

fn record_joined(counts: &mut DownloadCounts, joined: std::result::Result<DownloadResult, JoinError>) {
    match joined {
        Ok(result) => counts.record(&result.outcome),
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            error!(error = %e, "Download task panicked");
            counts.failed += 1;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::ImageSource;
    use crate::error::PersistenceError;
    use crate::downloader::tests::{FakeSource, png_body};
    use crate::tracker::TRIED_URLS_FILE;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn result_html(urls: &[String]) -> String {
        urls.iter()
            .map(|url| format!("<a m=\"{{&quot;murl&quot;:&quot;{url}&quot;}}\"></a>"))
            .collect()
    }

    fn test_config(server: &MockServer, dir: &TempDir, limit: usize) -> Config {
        let mut config = Config::for_query("cats");
        config.search_base_url = server.uri();
        config.output_dir = dir.path().join("images");
        config.tracker_dir = dir.path().join(".bingscraper");
        config.limit = limit;
        config.threads = 4;
        config.page_pause = Duration::from_millis(1);
        config
    }

    fn scraper_with_source(config: Config, source: Arc<dyn ImageSource>) -> Scraper {
        let dest = config.destination_dir();
        std::fs::create_dir_all(&dest).unwrap();
        let search = SearchClient::new(&config).unwrap();
        let downloader = ImageDownloader::new(
            source,
            dest,
            Arc::new(Tracker::new()),
            Arc::new(Semaphore::new(config.threads)),
        );
        Scraper::with_parts(config, search, downloader)
    }

    async fn mount_page(server: &MockServer, first: usize, urls: &[String]) {
        Mock::given(method("GET"))
            .and(path("/images/async"))
            .and(query_param("first", first.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(result_html(urls)))
            .mount(server)
            .await;
    }

    fn fake_urls(prefix: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("https://{prefix}.test/{i}.png"))
            .collect()
    }

    fn fake_source(urls: &[String]) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            bodies: urls.iter().map(|u| (u.clone(), png_body(u))).collect(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let mut config = Config::for_query("cats");
        config.threads = 0;
        assert!(matches!(
            Scraper::new(config).await,
            Err(Error::Config { .. })
        ));
    }

    #[tokio::test]
    async fn stops_at_limit_and_truncates_last_page() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let first_page = fake_urls("p0", 35);
        let second_page = fake_urls("p1", 35);
        mount_page(&server, 0, &first_page).await;
        mount_page(&server, 35, &second_page).await;
        let all: Vec<String> = first_page.iter().chain(&second_page).cloned().collect();

        let scraper = scraper_with_source(test_config(&server, &dir, 50), fake_source(&all));
        let summary = scraper.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::LimitReached);
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.urls_dispatched, 50);
        assert_eq!(summary.counts.saved, 50);
    }

    #[tokio::test]
    async fn two_consecutive_empty_pages_exhaust_results() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let urls = fake_urls("only", 10);
        mount_page(&server, 0, &urls).await;
        mount_page(&server, 10, &[]).await;

        let scraper = scraper_with_source(test_config(&server, &dir, 1000), fake_source(&urls));
        let summary = scraper.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::Exhausted);
        // one page of results, then two empty requests at offset 10
        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.counts.saved, 10);
    }

    #[tokio::test]
    async fn failed_page_requests_count_as_empty_pages() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scraper = scraper_with_source(test_config(&server, &dir, 100), fake_source(&[]));
        let summary = scraper.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::Exhausted);
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.urls_dispatched, 0);
    }

    #[tokio::test]
    async fn offset_advances_by_returned_count() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let short_page = fake_urls("short", 20);
        let next_page = fake_urls("next", 35);
        mount_page(&server, 0, &short_page).await;
        mount_page(&server, 20, &next_page).await;
        let all: Vec<String> = short_page.iter().chain(&next_page).cloned().collect();

        let scraper = scraper_with_source(test_config(&server, &dir, 55), fake_source(&all));
        let summary = scraper.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::LimitReached);
        assert_eq!(summary.counts.saved, 55);
    }

    #[tokio::test]
    async fn completion_persists_tracker_after_all_downloads_finish() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let urls = fake_urls("slow", 12);
        mount_page(&server, 0, &urls).await;
        let source = Arc::new(FakeSource {
            bodies: urls.iter().map(|u| (u.clone(), png_body(u))).collect(),
            delay: Duration::from_millis(30),
            ..Default::default()
        });

        let config = test_config(&server, &dir, 12);
        let tracker_dir = config.tracker_dir.clone();
        let scraper = scraper_with_source(config, source);
        let summary = scraper.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.counts.saved, 12);
        let reloaded = Tracker::load(&tracker_dir).await.unwrap();
        assert_eq!(reloaded.len_urls().await, 12);
        assert_eq!(reloaded.len_hashes().await, 12);
    }

    #[tokio::test]
    async fn cancellation_before_start_persists_and_fetches_nothing() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let config = test_config(&server, &dir, 100);
        let tracker_dir = config.tracker_dir.clone();
        let scraper = scraper_with_source(config, fake_source(&[]));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = scraper.run(cancel).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert_eq!(summary.pages_fetched, 0);
        assert!(tracker_dir.join(TRIED_URLS_FILE).exists());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn interrupt_mid_run_records_attempts_made_so_far() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let urls = fake_urls("stalled", 6);
        mount_page(&server, 0, &urls).await;
        let source = Arc::new(FakeSource {
            bodies: urls.iter().map(|u| (u.clone(), png_body(u))).collect(),
            delay: Duration::from_secs(30),
            ..Default::default()
        });

        let mut config = test_config(&server, &dir, 6);
        config.threads = 1;
        let tracker_dir = config.tracker_dir.clone();
        let scraper = Arc::new(scraper_with_source(config, source.clone()));

        let cancel = CancellationToken::new();
        let run = {
            let scraper = scraper.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scraper.run(cancel).await })
        };

        // Wait until the one gated download is stuck in its fetch
        while source.in_flight.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("interrupt should end the run promptly")
            .unwrap()
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert_eq!(summary.counts.saved, 0);
        let persisted = Tracker::load(&tracker_dir).await.unwrap().snapshot().await;
        let in_memory = scraper.tracker().snapshot().await;
        assert_eq!(persisted, in_memory);
        // Only the fetch that started counts as tried; the queued five stay fresh
        assert_eq!(persisted.tried_urls.len(), source.fetches.load(Ordering::SeqCst));
        assert_eq!(persisted.tried_urls.len(), 1);
        assert!(persisted.image_hashes.is_empty());
    }

    #[tokio::test]
    async fn interrupted_urls_left_on_the_gate_are_fetched_by_the_next_run() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let urls = fake_urls("resume", 4);
        mount_page(&server, 0, &urls).await;
        let bodies: HashMap<String, Vec<u8>> =
            urls.iter().map(|u| (u.clone(), png_body(u))).collect();
        let stalled = Arc::new(FakeSource {
            bodies: bodies.clone(),
            delay: Duration::from_secs(30),
            ..Default::default()
        });

        let mut config = test_config(&server, &dir, 4);
        config.threads = 1;
        let scraper = Arc::new(scraper_with_source(config.clone(), stalled.clone()));
        let cancel = CancellationToken::new();
        let run = {
            let scraper = scraper.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scraper.run(cancel).await })
        };
        while stalled.in_flight.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        run.await.unwrap().unwrap();

        let fresh = Arc::new(FakeSource {
            bodies,
            ..Default::default()
        });
        let resumed = Scraper::with_parts(
            config.clone(),
            SearchClient::new(&config).unwrap(),
            ImageDownloader::new(
                fresh.clone(),
                config.destination_dir(),
                Arc::new(Tracker::load(&config.tracker_dir).await.unwrap()),
                Arc::new(Semaphore::new(1)),
            ),
        );
        let summary = resumed.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.counts.saved, 3);
        assert_eq!(summary.counts.skipped, 1);
        assert_eq!(fresh.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unwritable_tracker_dir_fails_the_run() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let urls = fake_urls("persist", 3);
        mount_page(&server, 0, &urls).await;

        let mut config = test_config(&server, &dir, 3);
        config.tracker_dir = dir.path().join("not-a-directory");
        std::fs::write(&config.tracker_dir, b"occupied").unwrap();
        let scraper = scraper_with_source(config, fake_source(&urls));

        let result = scraper.run(CancellationToken::new()).await;

        assert!(
            matches!(
                result,
                Err(Error::Persistence(PersistenceError::Write { .. }))
            ),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn duplicate_urls_within_a_page_are_fetched_once() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let url = "https://dup.test/same.png".to_string();
        let page = vec![url.clone(), url.clone(), url.clone()];
        mount_page(&server, 0, &page).await;
        let source = Arc::new(FakeSource {
            bodies: HashMap::from([(url.clone(), png_body("same"))]),
            ..Default::default()
        });

        let scraper = scraper_with_source(test_config(&server, &dir, 3), source.clone());
        let summary = scraper.run(CancellationToken::new()).await.unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(summary.counts.saved, 1);
        assert_eq!(summary.counts.skipped, 2);
    }
}
