//! Proxy list parsing and health checking

use crate::client::{build_http_client, ClientError, ClientResult};
use crate::config::HttpConfig;
use futures::future::join_all;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// One HTTP proxy from the proxy file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxySpec {
    /// `http://host:port`
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Converts to a `reqwest::Proxy` routing all traffic, with basic auth
    /// when credentials are present
    pub fn to_proxy(&self) -> ClientResult<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(self.url())?;
        Ok(match (&self.username, &self.password) {
            (Some(user), Some(password)) => proxy.basic_auth(user, password),
            _ => proxy,
        })
    }
}

impl FromStr for ProxySpec {
    type Err = ClientError;

    /// Parses `host:port` or `host:port:user:password`
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidProxy(line.to_string());
        let parts: Vec<&str> = line.trim().split(':').collect();

        let (host, port, username, password) = match parts.as_slice() {
            [host, port] => (*host, *port, None, None),
            [host, port, user, password] => (*host, *port, Some(*user), Some(*password)),
            _ => return Err(invalid()),
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        })
    }
}

impl fmt::Display for ProxySpec {
    // Credentials are never logged
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reads a proxy file
///
/// Blank lines and `#` comments are ignored; malformed lines are logged and
/// skipped.
pub async fn read_proxy_file(path: &Path) -> ClientResult<Vec<ProxySpec>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ClientError::ProxyFile {
            path: path.display().to_string(),
            source,
        })?;

    let mut proxies = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<ProxySpec>() {
            Ok(spec) => proxies.push(spec),
            Err(e) => tracing::warn!("{}", e),
        }
    }

    Ok(proxies)
}

/// Returns true if `probe_url` answers 200 through the proxy
pub async fn check_proxy(spec: &ProxySpec, http: &HttpConfig) -> bool {
    let client = match build_http_client(http, Some(spec)) {
        Ok(client) => client,
        Err(e) => {
            tracing::debug!("Could not build client for proxy {}: {}", spec, e);
            return false;
        }
    };

    let timeout = Duration::from_secs(http.proxy_check_timeout_secs);
    match client.get(&http.proxy_check_url).timeout(timeout).send().await {
        Ok(response) => {
            tracing::debug!("Proxy {} returned status {}", spec, response.status());
            response.status() == reqwest::StatusCode::OK
        }
        Err(e) if e.is_timeout() => {
            tracing::warn!("Proxy {} timed out", spec);
            false
        }
        Err(e) => {
            tracing::warn!("Request through proxy {} failed: {}", spec, e);
            false
        }
    }
}

/// Health-checks every proxy concurrently and keeps the working ones
pub async fn healthy_proxies(proxies: Vec<ProxySpec>, http: &HttpConfig) -> Vec<ProxySpec> {
    tracing::info!("Checking {} proxy servers", proxies.len());

    let results = join_all(proxies.iter().map(|spec| check_proxy(spec, http))).await;
    let total = proxies.len();
    let working: Vec<ProxySpec> = proxies
        .into_iter()
        .zip(results)
        .filter_map(|(spec, ok)| ok.then_some(spec))
        .collect();

    tracing::info!("Found {} working proxies out of {}", working.len(), total);
    working
}
