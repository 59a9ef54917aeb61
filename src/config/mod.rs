//! Configuration module for Neb-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files. Every key has a default; command-line flags override file values.
//!
//! # Example
//!
//! ```no_run
//! use neb_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Crawl workers: {}", config.harvest.parser_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, HarvestConfig, HttpConfig, LoggingConfig, PacingConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
