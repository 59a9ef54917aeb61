//! The client pool itself

use crate::client::{healthy_proxies, read_proxy_file, ClientError, ClientResult, ProxySpec};
use crate::config::HttpConfig;
use rand::seq::SliceRandom;
use reqwest::Client;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

const FALLBACK_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Builds one HTTP client with a random browser User-Agent
///
/// # Arguments
///
/// * `http` - Timeouts and the User-Agent list
/// * `proxy` - Route all traffic through this proxy when set
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(ClientError)` - The proxy or TLS backend could not be configured
pub fn build_http_client(http: &HttpConfig, proxy: Option<&ProxySpec>) -> ClientResult<Client> {
    let user_agent = http
        .user_agents
        .choose(&mut rand::thread_rng())
        .map(String::as_str)
        .unwrap_or(FALLBACK_USER_AGENT);

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .gzip(true)
        .brotli(true);

    if let Some(spec) = proxy {
        builder = builder.proxy(spec.to_proxy()?);
    }

    Ok(builder.build()?)
}

/// A pool of ready-to-use clients, one per healthy proxy or a batch of
/// direct clients
pub struct ClientPool {
    clients: Mutex<VecDeque<Client>>,
    proxies: Vec<ProxySpec>,
    http: HttpConfig,
}

impl ClientPool {
    /// Builds the pool from the configured proxy file
    ///
    /// Falls back to `pool_size` direct clients when no proxy file is set,
    /// the file does not exist, or none of its proxies pass the health check.
    pub async fn setup(http: &HttpConfig) -> ClientResult<Self> {
        let proxies = match &http.proxy_file {
            Some(path) if Path::new(path).exists() => {
                let listed = read_proxy_file(Path::new(path)).await?;
                let working = healthy_proxies(listed, http).await;
                if working.is_empty() {
                    tracing::warn!("No working proxies found in {}", path);
                }
                working
            }
            Some(path) => {
                tracing::warn!("Proxy file {} does not exist", path);
                Vec::new()
            }
            None => Vec::new(),
        };

        if proxies.is_empty() {
            tracing::warn!("Creating {} clients without a proxy", http.pool_size);
            return Self::direct(http);
        }

        tracing::info!("Creating {} clients with proxies", proxies.len());
        let pool = Self {
            clients: Mutex::new(VecDeque::new()),
            proxies,
            http: http.clone(),
        };
        let clients = pool.spawn_clients()?;
        pool.clients.lock().await.extend(clients);
        Ok(pool)
    }

    /// A pool of `pool_size` direct (proxy-less) clients
    pub fn direct(http: &HttpConfig) -> ClientResult<Self> {
        let clients = (0..http.pool_size)
            .map(|_| build_http_client(http, None))
            .collect::<ClientResult<VecDeque<_>>>()?;
        Ok(Self {
            clients: Mutex::new(clients),
            proxies: Vec::new(),
            http: http.clone(),
        })
    }

    /// Takes a client out of the pool
    ///
    /// When fewer than `replenish_threshold` clients remain, a new batch is
    /// built first. An empty pool is an error.
    pub async fn pop_client(&self) -> ClientResult<Client> {
        let mut clients = self.clients.lock().await;
        if clients.is_empty() {
            return Err(ClientError::Exhausted);
        }

        if clients.len() < self.http.replenish_threshold {
            tracing::debug!(
                "Fewer than {} clients left, creating more",
                self.http.replenish_threshold
            );
            clients.extend(self.spawn_clients()?);
        }

        clients.pop_front().ok_or(ClientError::Exhausted)
    }

    /// Number of clients currently in the pool
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of healthy proxies backing the pool
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    fn spawn_clients(&self) -> ClientResult<Vec<Client>> {
        if self.proxies.is_empty() {
            let count = self.http.replenish_threshold.max(1);
            (0..count)
                .map(|_| build_http_client(&self.http, None))
                .collect()
        } else {
            self.proxies
                .iter()
                .map(|spec| build_http_client(&self.http, Some(spec)))
                .collect()
        }
    }
}
