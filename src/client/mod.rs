//! HTTP client pool
//!
//! This module hands ready-to-use `reqwest::Client`s to crawl and download
//! workers:
//! - Reading a proxy list (`host:port[:user:password]`, one per line)
//! - Concurrent health checks of every proxy against a probe URL
//! - A pool that replenishes itself when it runs low
//!
//! Each worker pops one client for its whole lifetime, so clients are never
//! shared between workers.

mod pool;
mod proxy;

pub use pool::{build_http_client, ClientPool};
pub use proxy::{check_proxy, healthy_proxies, read_proxy_file, ProxySpec};

use thiserror::Error;

/// Errors raised by the client pool
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No HTTP clients available, check the proxy settings")]
    Exhausted,

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    #[error("Failed to read proxy file {path}: {source}")]
    ProxyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid proxy line '{0}'")]
    InvalidProxy(String),
}

/// Result type for client pool operations
pub type ClientResult<T> = Result<T, ClientError>;
