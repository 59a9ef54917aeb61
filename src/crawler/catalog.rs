//! The catalog crawler worker pool
//!
//! Each worker takes one client from the pool for its whole lifetime, then
//! repeatedly claims a batch of page tasks, fetches and parses each page
//! outside the store lock, and merges the result back under it.

use crate::client::ClientPool;
use crate::config::{Config, PacingConfig};
use crate::crawler::backoff::{pause, random_delay, ExponentialBackoff};
use crate::crawler::coordinator::supervise;
use crate::crawler::fetcher::{fetch_page, FetchOutcome};
use crate::crawler::parser::parse_catalog_page;
use crate::crawler::scheduler::{claim_batch, should_exit};
use crate::state::{PageTask, StateStore, TaskOutcome};
use crate::Result;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

pub struct CatalogCrawler {
    store: Arc<StateStore>,
    clients: Arc<ClientPool>,
    base_url: Url,
    workers: usize,
    chunk_size: usize,
    max_retries: u32,
    checkpoint_every: u64,
    pacing: PacingConfig,
    timeout: Duration,
    cancel: CancellationToken,
}

impl CatalogCrawler {
    pub fn new(
        config: &Config,
        store: Arc<StateStore>,
        clients: Arc<ClientPool>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            store,
            clients,
            base_url: Url::parse(&config.harvest.base_url)?,
            workers: config.harvest.parser_workers,
            chunk_size: config.harvest.chunk_size,
            max_retries: config.harvest.page_retries,
            checkpoint_every: config.harvest.checkpoint_every_pages,
            pacing: config.pacing.clone(),
            timeout: Duration::from_secs(config.http.timeout_secs),
            cancel,
        })
    }

    /// Runs the worker pool until every worker has exited
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tracing::info!(
            "Starting {} crawl workers, chunk size {}",
            self.workers,
            self.chunk_size
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let crawler = Arc::clone(&self);
            workers.spawn(async move { crawler.worker(worker_id).await });
        }

        let result = supervise(workers, &self.cancel, "crawl").await;
        tracing::info!("Crawl workers finished");
        result
    }

    async fn worker(&self, worker_id: usize) -> Result<()> {
        let client = self.clients.pop_client().await?;
        tracing::debug!(worker = worker_id, "Crawl worker started");

        let idle = ExponentialBackoff::new(self.pacing.idle_poll_min_ms, self.pacing.idle_poll_max_ms);
        let mut idle_rounds = 0;
        let (mut completed, mut requeued) = (0u32, 0u32);

        while !self.cancel.is_cancelled() {
            let batch = {
                let mut state = self.store.access().await;
                let batch = claim_batch(&mut state, self.chunk_size, worker_id);
                if should_exit(&state, &batch) {
                    tracing::debug!(worker = worker_id, "No more pages, crawl worker exiting");
                    break;
                }
                batch
            };

            if batch.is_empty() {
                pause(&self.cancel, idle.delay(idle_rounds)).await;
                idle_rounds += 1;
                continue;
            }
            idle_rounds = 0;

            tracing::debug!(
                worker = worker_id,
                "Claimed pages {:?}",
                batch.iter().map(|t| t.page_number).collect::<Vec<_>>()
            );

            for task in batch {
                if self.cancel.is_cancelled() {
                    break;
                }

                let outcome = self.process_task(&client, task).await;
                if outcome.is_success() {
                    completed += 1;
                } else if !outcome.is_terminal() {
                    requeued += 1;
                }
                if matches!(outcome, TaskOutcome::EndOfCatalog { .. } | TaskOutcome::Skipped) {
                    continue;
                }

                let delay = random_delay(self.pacing.crawl_delay_min_ms, self.pacing.crawl_delay_max_ms);
                pause(&self.cancel, delay).await;
            }
        }

        tracing::debug!(
            worker = worker_id,
            completed,
            requeued,
            "Crawl worker stopped"
        );
        Ok(())
    }

    /// Fetches, parses and records one page
    ///
    /// A page that is already processed is skipped without a request. A
    /// failed fetch goes back to the retry queue until the retry budget is
    /// spent, after which the page is dropped and left as a gap.
    pub async fn process_task(&self, client: &Client, mut task: PageTask) -> TaskOutcome {
        let page = task.page_number;
        let worker = task.worker_id.unwrap_or_default();

        if self.store.access().await.is_processed(page) {
            tracing::debug!(page, worker, "Page already processed, skipping");
            return TaskOutcome::Skipped;
        }

        let url = match task.request.page_url(&self.base_url, page) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(page, worker, "Cannot build page URL: {}", e);
                self.store.access().await.drop_page(page);
                return TaskOutcome::Dropped {
                    attempts: task.attempt_count,
                };
            }
        };

        let body = match fetch_page(client, &url, self.timeout).await {
            FetchOutcome::Success { body } => body,
            failure => {
                let reason = failure.failure_reason().unwrap_or_default();
                return self.handle_failure(task, reason).await;
            }
        };

        task.items = parse_catalog_page(&body);
        task.processed = true;

        if task.items.is_empty() {
            task.end_of_catalog = true;
            let triggered = self.store.access().await.signal_end_of_catalog(page);
            if triggered {
                tracing::info!(page, worker, "Empty page, no further pages will be generated");
            } else {
                tracing::debug!(page, worker, "Empty page below the highest page seen");
            }
            return TaskOutcome::EndOfCatalog { triggered };
        }

        let found = task.items.len();
        let (added, checkpoint_due) = {
            let mut state = self.store.access().await;
            let added = state.record_page_items(page, &task.items);
            (added, state.record_completed_page(self.checkpoint_every))
        };

        tracing::info!(page, worker, found, added, "Processed page");

        if checkpoint_due {
            self.store.save_checkpoint().await;
        }

        TaskOutcome::Processed { found, added }
    }

    async fn handle_failure(&self, mut task: PageTask, reason: String) -> TaskOutcome {
        let page = task.page_number;
        task.record_failure(reason.clone());
        let attempt = task.attempt_count;

        if task.can_retry(self.max_retries) {
            tracing::warn!(page, attempt, "Failed to fetch page: {}", reason);
            self.store.access().await.push_retry(task);
            return TaskOutcome::Retrying { attempt };
        }

        tracing::error!(
            page,
            attempts = attempt,
            "Giving up on page after {} attempts: {}",
            attempt,
            reason
        );
        self.store.access().await.drop_page(page);
        TaskOutcome::Dropped { attempts: attempt }
    }
}
