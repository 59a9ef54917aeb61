//! Page task acquisition for the catalog crawler
//!
//! A worker claims a batch while holding the store's guard, then works on it
//! outside the lock. Retries are served first (oldest failure first); the
//! rest of the batch is filled with fresh page numbers until the end of the
//! catalog has been signalled.

use crate::state::{CrawlState, PageTask};
use std::sync::Arc;

/// Claims up to `chunk_size` page tasks for `worker_id`
///
/// # Arguments
///
/// * `state` - The locked crawl state
/// * `chunk_size` - Maximum batch size
/// * `worker_id` - The claiming worker
///
/// # Returns
///
/// The batch; empty once retries are exhausted and no more pages exist.
pub fn claim_batch(state: &mut CrawlState, chunk_size: usize, worker_id: usize) -> Vec<PageTask> {
    let mut batch = state.take_retries(chunk_size);

    if batch.len() < chunk_size && !state.no_more_pages() {
        let request = Arc::clone(state.request());
        let fresh = state.allocate_pages(chunk_size - batch.len());
        batch.extend(
            fresh
                .into_iter()
                .map(|page| PageTask::new(Arc::clone(&request), page)),
        );
    }

    for task in &mut batch {
        task.worker_id = Some(worker_id);
    }

    batch
}

/// Returns true when a worker that just claimed `batch` should exit
pub fn should_exit(state: &CrawlState, batch: &[PageTask]) -> bool {
    batch.is_empty() && state.no_more_pages() && state.retry_queue_len() == 0
}
