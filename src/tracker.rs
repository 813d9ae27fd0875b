//! Persistent dedup ledger of tried URLs and saved content hashes.
//!
//! The tracker is shared by every download task through an `Arc`. Both maps sit
//! behind a single async mutex, and every check-then-insert is one critical
//! section, so two tasks can never both treat the same URL or hash as new.
//!
//! On disk the state is two plain-text artifacts in the tracker directory:
//! - `tried_urls.txt` - one URL per line, sorted
//! - `image_md5s.tsv` - `<md5>\t<original filename>` per line, sorted by hash

use crate::error::{PersistenceError, Result};
use crate::utils::write_atomic;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// File name of the tried-URL list inside the tracker directory
pub const TRIED_URLS_FILE: &str = "tried_urls.txt";

/// File name of the hash table inside the tracker directory
pub const IMAGE_HASHES_FILE: &str = "image_md5s.tsv";

/// Point-in-time copy of the tracker state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackerSnapshot {
    /// URLs already attempted (saved, failed, or duplicate)
    pub tried_urls: BTreeSet<String>,
    /// Content hash -> original filename of the first save
    pub image_hashes: BTreeMap<String, String>,
}

impl TrackerSnapshot {
    fn render_urls(&self) -> String {
        self.tried_urls
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_hashes(&self) -> String {
        let mut out = String::new();
        for (hash, filename) in &self.image_hashes {
            out.push_str(hash);
            out.push('\t');
            out.push_str(filename);
            out.push('\n');
        }
        out
    }

    fn parse_urls(content: &str) -> BTreeSet<String> {
        content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn parse_hashes(content: &str, path: &Path) -> BTreeMap<String, String> {
        let mut hashes = BTreeMap::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once('\t') {
                Some((hash, filename)) if !hash.trim().is_empty() => {
                    hashes
                        .entry(hash.trim().to_string())
                        .or_insert_with(|| filename.to_string());
                }
                _ => {
                    warn!(
                        path = %path.display(),
                        line = index + 1,
                        "Skipping malformed hash table line"
                    );
                }
            }
        }
        hashes
    }
}

/// Shared dedup state for a scrape run
#[derive(Debug, Default)]
pub struct Tracker {
    state: Mutex<TrackerSnapshot>,
    /// Serializes persist calls so concurrent flushes cannot interleave temp files
    persist_lock: Mutex<()>,
}

impl Tracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker seeded with existing state
    pub fn from_snapshot(snapshot: TrackerSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            persist_lock: Mutex::new(()),
        }
    }

    /// Load tracker state from `dir`
    ///
    /// Missing artifacts (or a missing directory) yield empty collections.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Read`] if an artifact exists but cannot be read.
    pub async fn load(dir: &Path) -> Result<Self> {
        let urls_path = dir.join(TRIED_URLS_FILE);
        let hashes_path = dir.join(IMAGE_HASHES_FILE);

        let tried_urls = read_optional(&urls_path)
            .await?
            .map(|content| TrackerSnapshot::parse_urls(&content))
            .unwrap_or_default();
        let image_hashes = read_optional(&hashes_path)
            .await?
            .map(|content| TrackerSnapshot::parse_hashes(&content, &hashes_path))
            .unwrap_or_default();

        info!(
            dir = %dir.display(),
            tried_urls = tried_urls.len(),
            image_hashes = image_hashes.len(),
            "Loaded tracker state"
        );

        Ok(Self::from_snapshot(TrackerSnapshot {
            tried_urls,
            image_hashes,
        }))
    }

    /// Mark `url` as attempted
    ///
    /// Returns `true` if the URL was not tracked before. Checking and marking
    /// happen under one lock, so exactly one caller wins for any URL.
    pub async fn record_attempt(&self, url: &str) -> bool {
        let mut state = self.state.lock().await;
        state.tried_urls.insert(url.to_string())
    }

    /// Whether `url` has been attempted before
    pub async fn already_tried(&self, url: &str) -> bool {
        self.state.lock().await.tried_urls.contains(url)
    }

    /// Record that content with `hash` was saved from `filename`
    ///
    /// The first filename recorded for a hash wins. Returns the filename already
    /// recorded for `hash` if there is one, in which case nothing changes.
    pub async fn record_saved(&self, hash: &str, filename: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.image_hashes.get(hash) {
            return Some(existing.clone());
        }
        state
            .image_hashes
            .insert(hash.to_string(), filename.to_string());
        None
    }

    /// Original filename recorded for `hash`, if any
    pub async fn lookup_hash(&self, hash: &str) -> Option<String> {
        self.state.lock().await.image_hashes.get(hash).cloned()
    }

    /// Release a hash claim whose file could not be written
    pub async fn forget_hash(&self, hash: &str) {
        self.state.lock().await.image_hashes.remove(hash);
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> TrackerSnapshot {
        self.state.lock().await.clone()
    }

    /// Number of tried URLs
    pub async fn len_urls(&self) -> usize {
        self.state.lock().await.tried_urls.len()
    }

    /// Number of recorded content hashes
    pub async fn len_hashes(&self) -> usize {
        self.state.lock().await.image_hashes.len()
    }

    /// Overwrite both artifacts in `dir` with the current state
    ///
    /// Each artifact is replaced atomically. Calls are serialized, so repeated or
    /// concurrent persists (an interrupt racing normal shutdown) leave complete
    /// files reflecting the state at the time of the last call.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Write`] if the directory or an artifact cannot
    /// be written. The caller should treat this as fatal.
    pub async fn persist(&self, dir: &Path) -> Result<()> {
        let _guard = self.persist_lock.lock().await;

        let (urls, hashes, url_count, hash_count) = {
            let state = self.state.lock().await;
            (
                state.render_urls(),
                state.render_hashes(),
                state.tried_urls.len(),
                state.image_hashes.len(),
            )
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| PersistenceError::Write {
                path: dir.to_path_buf(),
                source,
            })?;

        for (name, contents) in [(TRIED_URLS_FILE, urls), (IMAGE_HASHES_FILE, hashes)] {
            let path = dir.join(name);
            write_atomic(&path, contents.as_bytes())
                .await
                .map_err(|source| PersistenceError::Write {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "Wrote tracker artifact");
        }

        info!(
            dir = %dir.display(),
            tried_urls = url_count,
            image_hashes = hash_count,
            "Persisted tracker state"
        );
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        }
        .into()),
    }
}
