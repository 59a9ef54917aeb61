use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::state::Request;

/// Main configuration structure for Neb-Harvest
///
/// Every section has defaults, so an empty file (or no file at all) is a
/// complete configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub harvest: HarvestConfig,
    pub pacing: PacingConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// Crawl and download behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HarvestConfig {
    /// Root URL of the remote library
    pub base_url: String,

    /// Directory under which per-query results are written
    pub output_dir: String,

    /// Maximum number of page tasks a crawl worker claims per batch
    pub chunk_size: usize,

    /// Number of concurrent catalog crawl workers
    pub parser_workers: usize,

    /// Number of concurrent download workers
    pub download_workers: usize,

    /// Attempts per catalog page before the page is dropped
    pub page_retries: u32,

    /// Attempts per download pass before the identifier is re-queued
    pub download_retries: u32,

    /// Failed download passes per run before an identifier is parked
    pub download_passes: u32,

    /// Minimum interval between two non-forced checkpoint saves
    pub checkpoint_debounce_secs: u64,

    /// Save a checkpoint after this many successfully processed pages
    pub checkpoint_every_pages: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://rusneb.ru".to_string(),
            output_dir: "results".to_string(),
            chunk_size: 10,
            parser_workers: 3,
            download_workers: 1,
            page_retries: 3,
            download_retries: 3,
            download_passes: 3,
            checkpoint_debounce_secs: 10,
            checkpoint_every_pages: 10,
        }
    }
}

impl HarvestConfig {
    /// Directory holding the checkpoint and downloads for one request
    pub fn query_dir(&self, request: &Request) -> PathBuf {
        PathBuf::from(&self.output_dir).join(request.slug())
    }

    /// Path of the checkpoint file for one request
    pub fn checkpoint_path(&self, request: &Request) -> PathBuf {
        self.query_dir(request).join("progress.json")
    }

    /// Directory downloaded files are written to for one request
    pub fn download_dir(&self, request: &Request) -> PathBuf {
        self.query_dir(request).join("downloads")
    }

    pub fn checkpoint_debounce(&self) -> Duration {
        Duration::from_secs(self.checkpoint_debounce_secs)
    }
}

/// Delays between requests and retry backoff
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PacingConfig {
    pub crawl_delay_min_ms: u64,
    pub crawl_delay_max_ms: u64,
    pub download_delay_min_ms: u64,
    pub download_delay_max_ms: u64,

    /// Base of the `base * 2^attempt` download retry backoff
    pub backoff_base_ms: u64,

    /// Idle polling bounds while the download queue is empty
    pub idle_poll_min_ms: u64,
    pub idle_poll_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            crawl_delay_min_ms: 500,
            crawl_delay_max_ms: 2000,
            download_delay_min_ms: 1000,
            download_delay_max_ms: 3000,
            backoff_base_ms: 1000,
            idle_poll_min_ms: 1000,
            idle_poll_max_ms: 10_000,
        }
    }
}

impl PacingConfig {
    /// A configuration with no delays at all, for tests
    pub fn immediate() -> Self {
        Self {
            crawl_delay_min_ms: 0,
            crawl_delay_max_ms: 0,
            download_delay_min_ms: 0,
            download_delay_max_ms: 0,
            backoff_base_ms: 0,
            idle_poll_min_ms: 5,
            idle_poll_max_ms: 20,
        }
    }
}

/// HTTP client pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpConfig {
    /// Total timeout for catalog page requests
    pub timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Total timeout for a single file download
    pub download_timeout_secs: u64,

    /// Number of direct clients built when no proxies are available
    pub pool_size: usize,

    /// The pool is topped up when fewer clients than this remain
    pub replenish_threshold: usize,

    /// Optional proxy list, one `host:port[:user:password]` per line
    pub proxy_file: Option<String>,

    /// URL used to health-check proxies
    pub proxy_check_url: String,

    pub proxy_check_timeout_secs: u64,

    /// User-Agent strings picked at random per client
    pub user_agents: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 10,
            download_timeout_secs: 120,
            pool_size: 100,
            replenish_threshold: 10,
            proxy_file: None,
            proxy_check_url: "https://httpbin.org/ip".to_string(),
            proxy_check_timeout_secs: 10,
            user_agents: default_user_agents(),
        }
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    ]
    .iter()
    .map(|ua| ua.to_string())
    .collect()
}

/// Log output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Directory for the rolling log file
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
        }
    }
}
