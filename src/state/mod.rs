//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `Request`: What the run targets (catalog browse or search)
//! - `PageTask`: One listing page plus its retry bookkeeping
//! - `CrawlState`: Discovered pages, dedup sets and the download queue
//! - `StateStore`: Exclusive access to the `CrawlState` and checkpointing

mod crawl_state;
mod page_task;
mod request;
mod store;

// Re-export main types
pub use crawl_state::{CrawlState, RequeueOutcome};
pub use page_task::{PageTask, TaskOutcome};
pub use request::Request;
pub use store::{LoadOutcome, SaveOutcome, StateStore};
