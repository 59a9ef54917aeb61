//! Storage module for persisting harvest progress
//!
//! This module handles the on-disk checkpoint of the crawl state:
//! - JSON encoding of the checkpoint document
//! - Atomic writes (temporary file + rename)
//! - Tolerant reads that survive missing or partially malformed files

mod checkpoint;

pub use checkpoint::{read_checkpoint, write_checkpoint, Checkpoint, LoadedCheckpoint};

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed checkpoint: {0}")]
    Malformed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
