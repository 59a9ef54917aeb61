//! The crawl state store
//!
//! Owns the [`CrawlState`] behind one coarse `tokio::sync::Mutex`. The only
//! way to read or mutate the state is [`StateStore::access`], whose guard
//! releases the lock on every exit path. Checkpoint I/O is serialized by a
//! second lock that also carries the debounce clock.

use crate::state::{CrawlState, Request};
use crate::storage::{read_checkpoint, write_checkpoint, StorageError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

/// Result of a checkpoint save request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Skipped because the previous save is inside the debounce window
    Debounced,
    /// The write failed; the error was logged
    Failed,
}

/// Result of loading the checkpoint at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No checkpoint file exists
    Fresh,

    /// The checkpoint was merged into the state
    Resumed {
        processed_pages: usize,
        queued: usize,
        downloaded: usize,
        retries: usize,
    },

    /// The checkpoint belongs to another query and was ignored
    RequestMismatch { found: String },

    /// The checkpoint could not be decoded and was ignored
    Unreadable,
}

pub struct StateStore {
    state: Mutex<CrawlState>,
    checkpoint_path: PathBuf,
    debounce: Duration,
    last_save: Mutex<Option<Instant>>,
}

impl StateStore {
    /// Creates a store with an empty state for `request`
    ///
    /// # Arguments
    ///
    /// * `request` - The crawl target
    /// * `checkpoint_path` - Where the checkpoint document lives
    /// * `debounce` - Minimum interval between two non-forced saves
    pub fn new(request: Request, checkpoint_path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            state: Mutex::new(CrawlState::new(request)),
            checkpoint_path: checkpoint_path.into(),
            debounce,
            last_save: Mutex::new(None),
        }
    }

    /// Grants exclusive access to the crawl state until the guard is dropped
    ///
    /// Never hold the guard across network I/O or a checkpoint save.
    pub async fn access(&self) -> MutexGuard<'_, CrawlState> {
        self.state.lock().await
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Merges the checkpoint file into the state, if there is one
    ///
    /// Never fails: an unreadable or foreign checkpoint is logged and the run
    /// continues with whatever state it already has.
    pub async fn load_checkpoint(&self) -> LoadOutcome {
        let loaded = match read_checkpoint(&self.checkpoint_path).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                tracing::info!(
                    "No checkpoint at {}, starting fresh",
                    self.checkpoint_path.display()
                );
                return LoadOutcome::Fresh;
            }
            Err(e) => {
                log_unreadable(&self.checkpoint_path, &e);
                return LoadOutcome::Unreadable;
            }
        };

        if !loaded.invalid_fields.is_empty() {
            tracing::warn!(
                fields = ?loaded.invalid_fields,
                "Checkpoint has missing or invalid fields, using defaults for them"
            );
        }

        let mut state = self.access().await;
        let found = &loaded.checkpoint.request;
        // Absent request and mode fields are tolerated like any other field
        let query_differs = !found.is_empty() && found != state.request().query();
        let mode_differs =
            matches!(loaded.checkpoint.search, Some(search) if search != state.request().is_search());
        if query_differs || mode_differs {
            let found = match loaded.checkpoint.search {
                Some(search) if mode_differs => Request::new(found.clone(), search).to_string(),
                _ => found.clone(),
            };
            tracing::warn!(
                "Checkpoint at {} belongs to {}, ignoring it",
                self.checkpoint_path.display(),
                found
            );
            return LoadOutcome::RequestMismatch { found };
        }

        state.merge_checkpoint(loaded.checkpoint);

        let outcome = LoadOutcome::Resumed {
            processed_pages: state.processed_pages().len(),
            queued: state.pending_downloads(),
            downloaded: state.downloaded().len(),
            retries: state.retry_queue_len(),
        };
        tracing::info!(
            "Resumed from checkpoint: highest page {}, {} pages processed, {} queued, {} downloaded, {} pages to retry",
            state.highest_page_seen(),
            state.processed_pages().len(),
            state.pending_downloads(),
            state.downloaded().len(),
            state.retry_queue_len()
        );
        outcome
    }

    /// Saves a snapshot unless the previous save was within the debounce window
    pub async fn save_checkpoint(&self) -> SaveOutcome {
        self.save(false).await
    }

    /// Saves a snapshot regardless of the debounce window
    pub async fn save_checkpoint_now(&self) -> SaveOutcome {
        self.save(true).await
    }

    async fn save(&self, force: bool) -> SaveOutcome {
        let mut last_save = self.last_save.lock().await;
        if !force {
            if let Some(at) = *last_save {
                if at.elapsed() < self.debounce {
                    return SaveOutcome::Debounced;
                }
            }
        }

        // The state lock is released before any I/O starts
        let snapshot = self.access().await.snapshot();

        match write_checkpoint(&self.checkpoint_path, &snapshot).await {
            Ok(()) => {
                *last_save = Some(Instant::now());
                tracing::debug!(
                    pages = snapshot.processed_pages.len(),
                    queued = snapshot.download_queue.len(),
                    downloaded = snapshot.downloaded.len(),
                    "Checkpoint saved to {}",
                    self.checkpoint_path.display()
                );
                SaveOutcome::Saved
            }
            Err(e) => {
                tracing::error!(
                    "Failed to save checkpoint to {}: {}",
                    self.checkpoint_path.display(),
                    e
                );
                SaveOutcome::Failed
            }
        }
    }
}

fn log_unreadable(path: &Path, error: &StorageError) {
    tracing::warn!(
        "Could not resume from checkpoint {}: {}; starting fresh",
        path.display(),
        error
    );
}
