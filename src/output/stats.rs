//! Statistics generation from a harvest checkpoint
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the persisted checkpoint of a query.

use crate::storage::{read_checkpoint, Checkpoint, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::Path;

/// Harvest statistics summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestStatistics {
    /// The query the checkpoint belongs to
    pub request: String,

    /// When the checkpoint was written
    pub saved_at: Option<DateTime<Utc>>,

    /// Highest page number ever assigned
    pub highest_page: u32,

    pub processed_pages: usize,

    /// Unprocessed page numbers below the highest page
    pub missing_pages: Vec<u32>,

    pub queued: usize,
    pub downloaded: usize,
}

impl HarvestStatistics {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let processed: BTreeSet<u32> = checkpoint.processed_pages.iter().copied().collect();
        let missing_pages = (1..=checkpoint.max_page_found)
            .filter(|p| !processed.contains(p))
            .collect();

        Self {
            request: checkpoint.request.clone(),
            saved_at: (checkpoint.timestamp > 0)
                .then(|| DateTime::from_timestamp_nanos(checkpoint.timestamp)),
            highest_page: checkpoint.max_page_found,
            processed_pages: processed.len(),
            missing_pages,
            queued: checkpoint.download_queue.len(),
            downloaded: checkpoint.downloaded.len(),
        }
    }

    /// Identifiers discovered so far
    pub fn discovered(&self) -> usize {
        self.queued + self.downloaded
    }

    /// Share of discovered identifiers already downloaded, in percent
    pub fn download_progress(&self) -> f64 {
        if self.discovered() == 0 {
            0.0
        } else {
            (self.downloaded as f64 / self.discovered() as f64) * 100.0
        }
    }
}

/// Loads statistics from the checkpoint at `path`
///
/// # Returns
///
/// * `Ok(Some(HarvestStatistics))` - Statistics for the checkpoint
/// * `Ok(None)` - No checkpoint exists yet
/// * `Err(StorageError)` - The checkpoint could not be read
pub async fn load_statistics(path: &Path) -> StorageResult<Option<HarvestStatistics>> {
    let loaded = read_checkpoint(path).await?;
    Ok(loaded.map(|loaded| HarvestStatistics::from_checkpoint(&loaded.checkpoint)))
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Query: {}", stats.request);
    match stats.saved_at {
        Some(at) => println!("Last saved: {}", at.to_rfc3339()),
        None => println!("Last saved: unknown"),
    }
    println!();

    println!("Pages:");
    println!("  Highest page seen: {}", stats.highest_page);
    println!("  Processed: {}", stats.processed_pages);
    if !stats.missing_pages.is_empty() {
        let shown: Vec<String> = stats
            .missing_pages
            .iter()
            .take(20)
            .map(|p| p.to_string())
            .collect();
        let more = stats.missing_pages.len().saturating_sub(shown.len());
        print!("  Missing: {}", shown.join(", "));
        if more > 0 {
            print!(" (+{} more)", more);
        }
        println!();
    }
    println!();

    println!("Documents:");
    println!("  Discovered: {}", stats.discovered());
    println!(
        "  Downloaded: {} ({:.1}%)",
        stats.downloaded,
        stats.download_progress()
    );
    println!("  Queued: {}", stats.queued);
}
