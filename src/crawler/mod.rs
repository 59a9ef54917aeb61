//! Crawler module for catalog traversal and document download
//!
//! This module contains the core harvesting logic, including:
//! - Page task acquisition (retry-first, fresh page blocks)
//! - The catalog crawler and downloader worker pools
//! - HTTP fetching and listing page parsing
//! - Overall run coordination

pub mod backoff;
mod catalog;
mod coordinator;
mod downloader;
mod fetcher;
mod parser;
pub mod scheduler;

pub use catalog::CatalogCrawler;
pub use coordinator::{run_harvest, Coordinator, HarvestReport};
pub use downloader::{Downloader, ItemResult};
pub use fetcher::{
    download_file, download_url, fetch_page, filename_from_disposition, DownloadOutcome,
    FetchOutcome,
};
pub use parser::parse_catalog_page;
