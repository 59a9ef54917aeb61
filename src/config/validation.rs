use crate::config::types::{Config, HarvestConfig, HttpConfig, PacingConfig};
use crate::ConfigError;
use url::Url;

/// Upper bound for any worker pool
const MAX_WORKERS: usize = 100;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_pacing_config(&config.pacing)?;
    validate_http_config(&config.http)?;
    Ok(())
}

/// Validates crawl and download settings
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            config.base_url
        )));
    }

    if config.output_dir.is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    if config.chunk_size < 1 {
        return Err(ConfigError::Validation(format!(
            "chunk_size must be >= 1, got {}",
            config.chunk_size
        )));
    }

    validate_worker_count("parser_workers", config.parser_workers)?;
    validate_worker_count("download_workers", config.download_workers)?;

    for (name, value) in [
        ("page_retries", config.page_retries),
        ("download_retries", config.download_retries),
        ("download_passes", config.download_passes),
    ] {
        if value < 1 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 1, got {}",
                name, value
            )));
        }
    }

    if config.checkpoint_every_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint_every_pages must be >= 1, got {}",
            config.checkpoint_every_pages
        )));
    }

    Ok(())
}

fn validate_worker_count(name: &str, count: usize) -> Result<(), ConfigError> {
    if !(1..=MAX_WORKERS).contains(&count) {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_WORKERS, count
        )));
    }
    Ok(())
}

/// Validates that every delay range is well-formed
fn validate_pacing_config(config: &PacingConfig) -> Result<(), ConfigError> {
    for (name, min, max) in [
        ("crawl_delay", config.crawl_delay_min_ms, config.crawl_delay_max_ms),
        (
            "download_delay",
            config.download_delay_min_ms,
            config.download_delay_max_ms,
        ),
        ("idle_poll", config.idle_poll_min_ms, config.idle_poll_max_ms),
    ] {
        if min > max {
            return Err(ConfigError::Validation(format!(
                "{}_min_ms ({}) must not exceed {}_max_ms ({})",
                name, min, name, max
            )));
        }
    }

    if config.idle_poll_min_ms == 0 {
        return Err(ConfigError::Validation(
            "idle_poll_min_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates HTTP client pool settings
fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.timeout_secs == 0 || config.download_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "HTTP timeouts must be > 0".to_string(),
        ));
    }

    if config.pool_size < 1 {
        return Err(ConfigError::Validation(format!(
            "pool_size must be >= 1, got {}",
            config.pool_size
        )));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    Url::parse(&config.proxy_check_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy_check_url: {}", e)))?;

    Ok(())
}
