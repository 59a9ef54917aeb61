//! Page task definitions for catalog crawling
//!
//! A page task is one unit of crawl work: a single listing page number plus
//! the retry bookkeeping of the worker that currently holds it.

use crate::state::Request;
use std::fmt;
use std::sync::Arc;

/// One catalog page to fetch and parse
#[derive(Debug, Clone)]
pub struct PageTask {
    /// The crawl target this page belongs to
    pub request: Arc<Request>,

    /// 1-based listing page number
    pub page_number: u32,

    /// Worker currently holding the task
    pub worker_id: Option<usize>,

    /// Whether the fetch+parse cycle has completed
    pub processed: bool,

    /// Identifiers discovered on the page
    pub items: Vec<String>,

    /// Number of failed fetch attempts so far
    pub attempt_count: u32,

    /// Description of the most recent failure
    pub last_error: Option<String>,

    /// Set when the page came back empty
    pub end_of_catalog: bool,
}

impl PageTask {
    pub fn new(request: Arc<Request>, page_number: u32) -> Self {
        Self {
            request,
            page_number,
            worker_id: None,
            processed: false,
            items: Vec::new(),
            attempt_count: 0,
            last_error: None,
            end_of_catalog: false,
        }
    }

    /// Records a failed attempt
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempt_count += 1;
        self.last_error = Some(error.into());
    }

    /// Returns true while the task still has attempts left
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.attempt_count < max_retries
    }
}

/// What happened to a page task after one processing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The page was already processed; nothing was fetched
    Skipped,

    /// Items were found and merged into the download queue
    Processed {
        /// Identifiers on the page
        found: usize,
        /// Identifiers that were new to the run
        added: usize,
    },

    /// The page was empty
    EndOfCatalog {
        /// Whether this page set the no-more-pages flag
        triggered: bool,
    },

    /// The fetch failed and the task went back to the retry queue
    Retrying { attempt: u32 },

    /// The fetch failed and the retry budget is exhausted
    Dropped { attempts: u32 },
}

impl TaskOutcome {
    /// Returns true if the page needs no further work this run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retrying { .. })
    }

    /// Returns true if the page's fetch+parse cycle completed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Processed { .. } | Self::EndOfCatalog { .. })
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Processed { found, added } => write!(f, "processed ({} found, {} new)", found, added),
            Self::EndOfCatalog { triggered: true } => write!(f, "end of catalog"),
            Self::EndOfCatalog { triggered: false } => write!(f, "empty"),
            Self::Retrying { attempt } => write!(f, "retrying (attempt {})", attempt),
            Self::Dropped { attempts } => write!(f, "dropped after {} attempts", attempts),
        }
    }
}
