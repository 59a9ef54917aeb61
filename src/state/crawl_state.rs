//! The crawl state payload shared by every crawl and download worker
//!
//! All fields are private. Mutations go through methods that keep the
//! cross-field invariants intact:
//! - an identifier is either pending (queued, in flight, or parked) or
//!   downloaded, never both
//! - an identifier is pending at most once
//! - `highest_page_seen` never decreases and covers every processed page
//!
//! The state is only reachable through [`StateStore::access`], so every
//! multi-field update happens under one lock.
//!
//! [`StateStore::access`]: crate::state::StateStore::access

use crate::state::{PageTask, Request};
use crate::storage::Checkpoint;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Result of putting a failed download back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Appended to the tail of the download queue
    Requeued { passes: u32 },

    /// Too many failed passes this run; kept for the next run only
    Parked { passes: u32 },
}

#[derive(Debug)]
pub struct CrawlState {
    request: Arc<Request>,

    highest_page_seen: u32,
    processed_pages: BTreeSet<u32>,
    /// Pages that used up their retries this run; they stay gaps
    dropped_pages: BTreeSet<u32>,
    retry_queue: VecDeque<PageTask>,
    no_more_pages: bool,
    /// Highest page that returned items, or that a resumed run already covered
    highest_page_with_items: u32,

    download_queue: VecDeque<String>,
    in_flight: BTreeSet<String>,
    parked: Vec<String>,
    /// Index over download_queue, in_flight and parked
    pending: HashSet<String>,
    downloaded: BTreeSet<String>,
    download_failures: HashMap<String, u32>,

    has_error: bool,
    crawl_finished: bool,
    pages_completed: u64,
}

impl CrawlState {
    pub fn new(request: Request) -> Self {
        Self {
            request: Arc::new(request),
            highest_page_seen: 0,
            processed_pages: BTreeSet::new(),
            dropped_pages: BTreeSet::new(),
            retry_queue: VecDeque::new(),
            no_more_pages: false,
            highest_page_with_items: 0,
            download_queue: VecDeque::new(),
            in_flight: BTreeSet::new(),
            parked: Vec::new(),
            pending: HashSet::new(),
            downloaded: BTreeSet::new(),
            download_failures: HashMap::new(),
            has_error: false,
            crawl_finished: false,
            pages_completed: 0,
        }
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn highest_page_seen(&self) -> u32 {
        self.highest_page_seen
    }

    pub fn processed_pages(&self) -> &BTreeSet<u32> {
        &self.processed_pages
    }

    pub fn is_processed(&self, page_number: u32) -> bool {
        self.processed_pages.contains(&page_number)
    }

    pub fn no_more_pages(&self) -> bool {
        self.no_more_pages
    }

    pub fn retry_queue_len(&self) -> usize {
        self.retry_queue.len()
    }

    /// Page numbers currently waiting in the retry queue, oldest first
    pub fn retry_pages(&self) -> Vec<u32> {
        self.retry_queue.iter().map(|t| t.page_number).collect()
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// Marks the run as failed; the flag is sticky
    pub fn set_has_error(&mut self) {
        self.has_error = true;
    }

    pub fn crawl_finished(&self) -> bool {
        self.crawl_finished
    }

    /// Records that the crawler pool has exited
    pub fn set_crawl_finished(&mut self) {
        self.crawl_finished = true;
    }

    /// Identifiers waiting to be downloaded, in queue order
    pub fn download_queue(&self) -> impl Iterator<Item = &String> {
        self.download_queue.iter()
    }

    pub fn download_queue_len(&self) -> usize {
        self.download_queue.len()
    }

    pub fn parked_downloads(&self) -> &[String] {
        &self.parked
    }

    /// Queued, in-flight and parked identifiers
    pub fn pending_downloads(&self) -> usize {
        self.pending.len()
    }

    pub fn downloaded(&self) -> &BTreeSet<String> {
        &self.downloaded
    }

    pub fn is_downloaded(&self, id: &str) -> bool {
        self.downloaded.contains(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    // ===== Page scheduling =====

    /// Removes up to `max` tasks from the front of the retry queue
    pub fn take_retries(&mut self, max: usize) -> Vec<PageTask> {
        let count = max.min(self.retry_queue.len());
        self.retry_queue.drain(..count).collect()
    }

    /// Allocates up to `count` fresh page numbers after `highest_page_seen`
    ///
    /// Pages already processed are skipped, and `highest_page_seen` advances
    /// to cover the whole block. Nothing is allocated once the end of the
    /// catalog has been signalled.
    pub fn allocate_pages(&mut self, count: usize) -> Vec<u32> {
        let mut pages = Vec::with_capacity(count);
        if self.no_more_pages {
            return pages;
        }

        let mut next = self.highest_page_seen;
        while pages.len() < count {
            next = match next.checked_add(1) {
                Some(n) => n,
                None => break,
            };
            if !self.processed_pages.contains(&next) {
                pages.push(next);
            }
        }

        self.highest_page_seen = self.highest_page_seen.max(next);
        pages
    }

    pub fn push_retry(&mut self, task: PageTask) {
        self.retry_queue.push_back(task);
    }

    pub fn mark_processed(&mut self, page_number: u32) {
        self.dropped_pages.remove(&page_number);
        self.processed_pages.insert(page_number);
        self.highest_page_seen = self.highest_page_seen.max(page_number);
    }

    /// Records a page whose retry budget is spent
    ///
    /// The page is not marked processed, so a later run retries it, but it
    /// no longer holds back end-of-catalog detection for pages above it.
    pub fn drop_page(&mut self, page_number: u32) {
        if !self.processed_pages.contains(&page_number) {
            self.dropped_pages.insert(page_number);
        }
    }

    pub fn dropped_pages(&self) -> &BTreeSet<u32> {
        &self.dropped_pages
    }

    /// Merges the identifiers found on a page and marks the page processed
    ///
    /// Returns the number of identifiers that were new to the run.
    pub fn record_page_items(&mut self, page_number: u32, items: &[String]) -> usize {
        let added = items
            .iter()
            .filter(|id| self.enqueue_download(id.as_str()))
            .count();
        if !items.is_empty() {
            self.highest_page_with_items = self.highest_page_with_items.max(page_number);
        }
        self.mark_processed(page_number);
        added
    }

    /// Handles an empty page
    ///
    /// The page counts as processed. No further page numbers are generated
    /// if the page is at or beyond the highest page allocated so far, or if
    /// every page below it is processed or dropped and no page above it has
    /// returned items. The second case ends the crawl when other workers keep
    /// allocating ahead of the empty page. Returns true when this call set
    /// the flag.
    pub fn signal_end_of_catalog(&mut self, page_number: u32) -> bool {
        let triggered = !self.no_more_pages
            && (page_number >= self.highest_page_seen || self.is_first_empty_page(page_number));
        if triggered {
            self.no_more_pages = true;
        }
        self.mark_processed(page_number);
        triggered
    }

    fn is_first_empty_page(&self, page_number: u32) -> bool {
        let below = page_number.saturating_sub(1) as usize;
        let settled = self.processed_pages.range(..page_number).count()
            + self.dropped_pages.range(..page_number).count();
        page_number > self.highest_page_with_items && settled == below
    }

    /// Counts a successfully processed page
    ///
    /// Returns true on every `every`-th page, when a checkpoint is due.
    pub fn record_completed_page(&mut self, every: u64) -> bool {
        self.pages_completed += 1;
        every > 0 && self.pages_completed % every == 0
    }

    pub fn pages_completed(&self) -> u64 {
        self.pages_completed
    }

    // ===== Downloads =====

    /// Appends an identifier unless it is already pending or downloaded
    pub fn enqueue_download(&mut self, id: &str) -> bool {
        if self.downloaded.contains(id) || self.pending.contains(id) {
            return false;
        }
        self.pending.insert(id.to_string());
        self.download_queue.push_back(id.to_string());
        true
    }

    /// Takes the next identifier off the queue and marks it in flight
    pub fn pop_download(&mut self) -> Option<String> {
        while let Some(id) = self.download_queue.pop_front() {
            if self.downloaded.contains(&id) {
                self.pending.remove(&id);
                continue;
            }
            self.in_flight.insert(id.clone());
            return Some(id);
        }
        None
    }

    pub fn mark_downloaded(&mut self, id: &str) {
        self.in_flight.remove(id);
        self.pending.remove(id);
        self.download_queue.retain(|queued| queued != id);
        self.parked.retain(|parked| parked != id);
        self.download_failures.remove(id);
        self.downloaded.insert(id.to_string());
    }

    /// Puts a failed identifier back at the tail of the queue
    ///
    /// After `max_passes` failed passes in this run the identifier is parked
    /// instead: it stays pending (and is checkpointed) but is not handed out
    /// again until the next run.
    pub fn requeue_download(&mut self, id: String, max_passes: u32) -> RequeueOutcome {
        self.in_flight.remove(&id);
        self.pending.insert(id.clone());

        let passes = self.download_failures.entry(id.clone()).or_insert(0);
        *passes += 1;
        let passes = *passes;

        if passes >= max_passes {
            self.parked.push(id);
            RequeueOutcome::Parked { passes }
        } else {
            self.download_queue.push_back(id);
            RequeueOutcome::Requeued { passes }
        }
    }

    /// Returns an interrupted identifier to the front of the queue
    pub fn return_download(&mut self, id: String) {
        self.in_flight.remove(&id);
        self.pending.insert(id.clone());
        self.download_queue.push_front(id);
    }

    // ===== Checkpointing =====

    /// Captures the persistent part of the state
    ///
    /// In-flight and parked identifiers are written as part of the download
    /// queue so nothing pending is lost on restart.
    pub fn snapshot(&self) -> Checkpoint {
        let download_queue = self
            .in_flight
            .iter()
            .chain(self.download_queue.iter())
            .chain(self.parked.iter())
            .cloned()
            .collect();

        Checkpoint {
            request: self.request.query().to_string(),
            search: Some(self.request.is_search()),
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            max_page_found: self.highest_page_seen,
            processed_pages: self.processed_pages.iter().copied().collect(),
            download_queue,
            downloaded: self.downloaded.iter().cloned().collect(),
        }
    }

    /// Merges a checkpoint into this state (union semantics)
    ///
    /// Sets are unioned, persisted queue entries are appended after existing
    /// ones in their original order, and anything already downloaded is
    /// dropped from the queue. The retry queue is then rebuilt from the gaps
    /// in `1..=highest_page_seen`.
    pub fn merge_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.processed_pages
            .extend(checkpoint.processed_pages.into_iter().filter(|&p| p > 0));
        self.highest_page_seen = self
            .highest_page_seen
            .max(checkpoint.max_page_found)
            .max(self.processed_pages.last().copied().unwrap_or(0));
        self.highest_page_with_items = self.highest_page_with_items.max(self.highest_page_seen);

        let newly_downloaded: Vec<String> = checkpoint
            .downloaded
            .into_iter()
            .filter(|id| !self.downloaded.contains(id))
            .collect();
        for id in newly_downloaded {
            self.mark_downloaded(&id);
        }

        for id in checkpoint.download_queue {
            self.enqueue_download(&id);
        }

        self.rebuild_retry_queue();
    }

    /// Re-derives retry tasks for every unprocessed page up to the highest
    /// page seen
    pub fn rebuild_retry_queue(&mut self) {
        let queued: HashSet<u32> = self.retry_queue.iter().map(|t| t.page_number).collect();
        let gaps: Vec<u32> = (1..=self.highest_page_seen)
            .filter(|p| !self.processed_pages.contains(p) && !queued.contains(p))
            .collect();

        for page in gaps {
            self.retry_queue
                .push_back(PageTask::new(Arc::clone(&self.request), page));
        }
    }

    /// Verifies the cross-field invariants
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for id in self
            .download_queue
            .iter()
            .chain(self.in_flight.iter())
            .chain(self.parked.iter())
        {
            if self.downloaded.contains(id) {
                return Err(format!("'{}' is both pending and downloaded", id));
            }
            if !seen.insert(id.as_str()) {
                return Err(format!("'{}' is pending more than once", id));
            }
        }

        if seen.len() != self.pending.len() {
            return Err(format!(
                "pending index has {} entries but {} identifiers are pending",
                self.pending.len(),
                seen.len()
            ));
        }

        if let Some(page) = self.dropped_pages.intersection(&self.processed_pages).next() {
            return Err(format!("page {} is both processed and dropped", page));
        }

        if let Some(&max) = self.processed_pages.last() {
            if max > self.highest_page_seen {
                return Err(format!(
                    "processed page {} exceeds highest page seen {}",
                    max, self.highest_page_seen
                ));
            }
        }

        Ok(())
    }
}
