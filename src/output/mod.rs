//! Output module for reporting harvest progress
//!
//! This module handles:
//! - Computing statistics from a query's checkpoint
//! - Printing them for the `--stats` command

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics};
