//! The downloader worker pool
//!
//! Workers drain the shared download queue while the crawler is still
//! filling it. An empty queue only ends a worker once the crawl pool has
//! finished; until then workers poll with an increasing idle delay.

use crate::client::ClientPool;
use crate::config::{Config, PacingConfig};
use crate::crawler::backoff::{pause, random_delay, ExponentialBackoff};
use crate::crawler::coordinator::supervise;
use crate::crawler::fetcher::{download_file, download_url, DownloadOutcome};
use crate::state::{RequeueOutcome, StateStore};
use crate::Result;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Final result of all attempts for one identifier
#[derive(Debug)]
pub enum ItemResult {
    Saved { path: PathBuf, bytes: u64 },
    Failed { reason: String },
    /// The stop signal fired mid-download
    Cancelled,
}

pub struct Downloader {
    store: Arc<StateStore>,
    clients: Arc<ClientPool>,
    base_url: Url,
    download_dir: PathBuf,
    workers: usize,
    max_retries: u32,
    max_passes: u32,
    pacing: PacingConfig,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(
        config: &Config,
        download_dir: PathBuf,
        store: Arc<StateStore>,
        clients: Arc<ClientPool>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            store,
            clients,
            base_url: Url::parse(&config.harvest.base_url)?,
            download_dir,
            workers: config.harvest.download_workers,
            max_retries: config.harvest.download_retries,
            max_passes: config.harvest.download_passes,
            pacing: config.pacing.clone(),
            timeout: Duration::from_secs(config.http.download_timeout_secs),
            cancel,
        })
    }

    /// Runs the worker pool until every worker has exited
    ///
    /// Fails before starting any worker if the download directory cannot be
    /// created.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        tracing::info!(
            "Starting {} download workers, saving to {}",
            self.workers,
            self.download_dir.display()
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let downloader = Arc::clone(&self);
            workers.spawn(async move { downloader.worker(worker_id).await });
        }

        let result = supervise(workers, &self.cancel, "download").await;
        tracing::info!("Download workers finished");
        result
    }

    async fn worker(&self, worker_id: usize) -> Result<()> {
        let client = self.clients.pop_client().await?;
        tracing::debug!(worker = worker_id, "Download worker started");

        let idle = ExponentialBackoff::new(self.pacing.idle_poll_min_ms, self.pacing.idle_poll_max_ms);
        let mut idle_rounds = 0;

        while !self.cancel.is_cancelled() {
            let next = {
                let mut state = self.store.access().await;
                let next = state.pop_download();
                if next.is_none() && state.crawl_finished() {
                    tracing::debug!(worker = worker_id, "Download queue drained, worker exiting");
                    break;
                }
                next
            };

            let id = match next {
                Some(id) => id,
                None => {
                    tracing::trace!(worker = worker_id, "Download queue is empty, waiting");
                    pause(&self.cancel, idle.delay(idle_rounds)).await;
                    idle_rounds += 1;
                    continue;
                }
            };
            idle_rounds = 0;

            match self.download_with_retries(&client, &id).await {
                ItemResult::Saved { path, bytes } => {
                    self.store.access().await.mark_downloaded(&id);
                    tracing::info!(item = %id, bytes, "Saved {}", path.display());
                }
                ItemResult::Failed { reason } => {
                    let outcome = self.store.access().await.requeue_download(id.clone(), self.max_passes);
                    match outcome {
                        RequeueOutcome::Requeued { passes } => tracing::error!(
                            item = %id,
                            passes,
                            "Failed to download after {} attempts ({}), re-adding to queue",
                            self.max_retries,
                            reason
                        ),
                        RequeueOutcome::Parked { passes } => tracing::error!(
                            item = %id,
                            passes,
                            "Failed to download in {} passes ({}), keeping it for the next run",
                            passes,
                            reason
                        ),
                    }
                }
                ItemResult::Cancelled => {
                    self.store.access().await.return_download(id);
                    break;
                }
            }

            let delay = random_delay(self.pacing.download_delay_min_ms, self.pacing.download_delay_max_ms);
            pause(&self.cancel, delay).await;
        }

        Ok(())
    }

    /// Makes up to `download-retries` attempts for one identifier
    ///
    /// Waits `base * 2^attempt` between attempts. A non-PDF response ends
    /// the attempts immediately.
    pub async fn download_with_retries(&self, client: &Client, id: &str) -> ItemResult {
        let url = match download_url(&self.base_url, id) {
            Ok(url) => url,
            Err(e) => {
                return ItemResult::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let backoff = ExponentialBackoff::new(self.pacing.backoff_base_ms, MAX_RETRY_BACKOFF_MS);
        let mut last_reason = String::from("no attempts made");

        for attempt in 0..self.max_retries {
            tracing::debug!(item = %id, attempt, "Downloading");

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return ItemResult::Cancelled,
                outcome = download_file(client, &url, id, &self.download_dir, self.timeout) => outcome,
            };

            match outcome {
                DownloadOutcome::Saved { path, bytes } => return ItemResult::Saved { path, bytes },
                DownloadOutcome::ContentMismatch { content_type } => {
                    tracing::warn!(
                        item = %id,
                        "Response is not a PDF (content type '{}'), not retrying",
                        content_type
                    );
                    return ItemResult::Failed {
                        reason: format!("unexpected content type '{}'", content_type),
                    };
                }
                DownloadOutcome::Retryable { reason } => {
                    tracing::warn!(item = %id, attempt, "Download attempt failed: {}", reason);
                    last_reason = reason;
                }
            }

            if attempt + 1 < self.max_retries && !pause(&self.cancel, backoff.delay(attempt)).await {
                return ItemResult::Cancelled;
            }
        }

        ItemResult::Failed {
            reason: last_reason,
        }
    }
}
