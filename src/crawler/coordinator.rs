//! Harvest coordinator - main orchestration logic
//!
//! This module ties the pieces of a run together:
//! - Building the state store and resuming from the checkpoint
//! - Running the crawl and download pools concurrently on one store
//! - Propagating faults and cancellation through one shared stop signal
//! - Flushing a final checkpoint on every exit path

use crate::client::ClientPool;
use crate::config::Config;
use crate::crawler::catalog::CatalogCrawler;
use crate::crawler::downloader::Downloader;
use crate::state::{CrawlState, LoadOutcome, Request, StateStore};
use crate::{HarvestError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Summary of one harvest run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    /// Pages with items processed in this run
    pub pages_processed: u64,

    pub highest_page: u32,

    /// Processed pages across all runs
    pub pages_total: usize,

    /// Identifiers known so far (pending or downloaded)
    pub discovered: usize,

    pub downloaded: usize,

    /// Identifiers still pending, parked ones included
    pub queued: usize,

    /// Identifiers that exhausted their passes this run
    pub parked: usize,

    /// Pages left unprocessed below the highest page
    pub gaps: usize,

    pub reached_end: bool,
    pub has_error: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl HarvestReport {
    fn from_state(state: &CrawlState, cancelled: bool, elapsed: Duration) -> Self {
        let highest_page = state.highest_page_seen();
        let pages_total = state.processed_pages().len();
        Self {
            pages_processed: state.pages_completed(),
            highest_page,
            pages_total,
            discovered: state.pending_downloads() + state.downloaded().len(),
            downloaded: state.downloaded().len(),
            queued: state.pending_downloads(),
            parked: state.parked_downloads().len(),
            gaps: (highest_page as usize).saturating_sub(pages_total),
            reached_end: state.no_more_pages(),
            has_error: state.has_error(),
            cancelled,
            elapsed,
        }
    }

    /// True when nothing is left to do for this query
    pub fn is_complete(&self) -> bool {
        self.reached_end && self.queued == 0 && self.gaps == 0 && !self.has_error
    }
}

impl fmt::Display for HarvestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages processed this run (highest page {}, {} gaps), {} identifiers discovered, {} downloaded, {} queued ({} parked) in {:.1}s",
            self.pages_processed,
            self.highest_page,
            self.gaps,
            self.discovered,
            self.downloaded,
            self.queued,
            self.parked,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Main harvest coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    request: Request,
    store: Arc<StateStore>,
    clients: Arc<ClientPool>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator, building the client pool from the config
    ///
    /// # Arguments
    ///
    /// * `config` - The harvest configuration
    /// * `request` - What to crawl
    /// * `fresh` - Ignore any existing checkpoint
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(HarvestError)` - The client pool could not be built
    pub async fn new(config: Config, request: Request, fresh: bool) -> Result<Self> {
        let clients = Arc::new(ClientPool::setup(&config.http).await?);
        Self::with_client_pool(config, request, clients, fresh).await
    }

    /// Creates a coordinator around an existing client pool
    pub async fn with_client_pool(
        config: Config,
        request: Request,
        clients: Arc<ClientPool>,
        fresh: bool,
    ) -> Result<Self> {
        let store = Arc::new(StateStore::new(
            request.clone(),
            config.harvest.checkpoint_path(&request),
            config.harvest.checkpoint_debounce(),
        ));

        if fresh {
            tracing::info!("Fresh run requested, ignoring any existing checkpoint");
        } else if let LoadOutcome::Resumed { .. } = store.load_checkpoint().await {
            tracing::info!("Resuming {}", request);
        }

        Ok(Self {
            config: Arc::new(config),
            request,
            store,
            clients,
            cancel: CancellationToken::new(),
        })
    }

    /// The shared stop signal; cancelling it stops the run gracefully
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Runs both worker pools to completion
    ///
    /// The crawl pool ends once the end of the catalog is reached and no
    /// retries remain; the download pool ends once the crawl pool has ended
    /// and the queue is drained. A fault in either pool stops both. A final
    /// checkpoint is always written.
    pub async fn run(&self) -> Result<HarvestReport> {
        tracing::info!("Starting harvest of {}", self.request);
        let started = Instant::now();

        let result = self.run_pools().await;

        if let Err(e) = &result {
            tracing::error!("Harvest stopped by a fault: {}", e);
            self.store.access().await.set_has_error();
        }

        let cancelled = self.cancel.is_cancelled() && result.is_ok();
        if cancelled {
            tracing::warn!("Harvest cancelled");
        }

        tracing::info!("Saving progress");
        self.store.save_checkpoint_now().await;

        let report = HarvestReport::from_state(&*self.store.access().await, cancelled, started.elapsed());
        tracing::info!("Harvest finished: {}", report);
        Ok(report)
    }

    async fn run_pools(&self) -> Result<()> {
        let download_dir = self.config.harvest.download_dir(&self.request);

        let crawler = Arc::new(CatalogCrawler::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.clients),
            self.cancel.clone(),
        )?);
        let downloader = Arc::new(Downloader::new(
            &self.config,
            download_dir,
            Arc::clone(&self.store),
            Arc::clone(&self.clients),
            self.cancel.clone(),
        )?);

        let crawl = async {
            let result = crawler.run().await;
            self.store.access().await.set_crawl_finished();
            result
        };
        let download = async {
            let result = downloader.run().await;
            if result.is_err() {
                self.cancel.cancel();
            }
            result
        };

        let (crawl_result, download_result) = tokio::join!(crawl, download);
        crawl_result.and(download_result)
    }
}

/// Waits for every worker in `workers`
///
/// The first worker error or panic cancels the shared stop signal and
/// aborts the remaining workers. Workers ended by that abort are expected
/// and not reported. Returns the first fault.
pub(crate) async fn supervise(
    mut workers: JoinSet<Result<()>>,
    cancel: &CancellationToken,
    pool: &str,
) -> Result<()> {
    let mut first_fault: Option<HarvestError> = None;

    while let Some(joined) = workers.join_next().await {
        let fault = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) if e.is_cancelled() => {
                tracing::debug!("A {} worker was cancelled", pool);
                continue;
            }
            Err(e) => HarvestError::Worker(e.to_string()),
        };

        tracing::error!("A {} worker failed: {}", pool, fault);
        if first_fault.is_none() {
            cancel.cancel();
            workers.abort_all();
            first_fault = Some(fault);
        }
    }

    match first_fault {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

/// Runs a complete harvest for one request
///
/// This is the main library entry point. It will:
/// 1. Build the client pool
/// 2. Resume from the query's checkpoint unless `fresh` is set
/// 3. Crawl listing pages and download documents concurrently
/// 4. Save a final checkpoint
pub async fn run_harvest(config: Config, request: Request, fresh: bool) -> Result<HarvestReport> {
    let coordinator = Coordinator::new(config, request, fresh).await?;
    coordinator.run().await
}
