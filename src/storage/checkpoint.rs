//! The persisted JSON snapshot of a harvest run
//!
//! One checkpoint file exists per query. It is written atomically (temporary
//! file, then rename) and read tolerantly: a missing file means a fresh start,
//! and individual fields that fail to parse fall back to their defaults.

use crate::storage::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// On-disk representation of the crawl state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The query string the state belongs to
    pub request: String,

    /// Whether the query is a full-text search; absent in older documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<bool>,

    /// Nanoseconds since the Unix epoch at snapshot time
    pub timestamp: i64,

    /// Highest page number ever assigned
    pub max_page_found: u32,

    pub processed_pages: Vec<u32>,

    /// Pending identifiers, in queue order
    pub download_queue: Vec<String>,

    pub downloaded: Vec<String>,
}

/// A decoded checkpoint plus the names of fields that had to be defaulted
#[derive(Debug)]
pub struct LoadedCheckpoint {
    pub checkpoint: Checkpoint,
    pub invalid_fields: Vec<&'static str>,
}

impl Checkpoint {
    /// Decodes a checkpoint document field by field
    ///
    /// Only a document that is not a JSON object at all is an error. A field
    /// with the wrong shape is replaced by its default and reported in
    /// `invalid_fields`.
    pub fn from_json_str(content: &str) -> StorageResult<LoadedCheckpoint> {
        let value: Value = serde_json::from_str(content)?;
        let object = value.as_object().ok_or_else(|| {
            StorageError::Malformed("checkpoint is not a JSON object".to_string())
        })?;

        let mut invalid_fields = Vec::new();
        let mut checkpoint = Checkpoint::default();
        decode_field(object, "request", &mut checkpoint.request, &mut invalid_fields);
        if let Some(Value::Bool(search)) = object.get("search") {
            checkpoint.search = Some(*search);
        }
        decode_field(object, "timestamp", &mut checkpoint.timestamp, &mut invalid_fields);
        decode_field(
            object,
            "max_page_found",
            &mut checkpoint.max_page_found,
            &mut invalid_fields,
        );
        decode_field(
            object,
            "processed_pages",
            &mut checkpoint.processed_pages,
            &mut invalid_fields,
        );
        decode_field(
            object,
            "download_queue",
            &mut checkpoint.download_queue,
            &mut invalid_fields,
        );
        decode_field(object, "downloaded", &mut checkpoint.downloaded, &mut invalid_fields);

        Ok(LoadedCheckpoint {
            checkpoint,
            invalid_fields,
        })
    }
}

fn decode_field<T: DeserializeOwned>(
    object: &Map<String, Value>,
    name: &'static str,
    target: &mut T,
    invalid_fields: &mut Vec<&'static str>,
) {
    match object.get(name).cloned().map(serde_json::from_value) {
        Some(Ok(decoded)) => *target = decoded,
        Some(Err(_)) | None => invalid_fields.push(name),
    }
}

/// Reads the checkpoint at `path`
///
/// # Returns
///
/// * `Ok(None)` - No checkpoint exists yet
/// * `Ok(Some(LoadedCheckpoint))` - Decoded (possibly partially) checkpoint
/// * `Err(StorageError)` - The file exists but could not be read or decoded
pub async fn read_checkpoint(path: &Path) -> StorageResult<Option<LoadedCheckpoint>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Checkpoint::from_json_str(&content).map(Some)
}

/// Writes the checkpoint to `path` as one atomic JSON document
pub async fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let body = serde_json::to_vec_pretty(checkpoint)?;
    let tmp_path = temporary_path(path);
    tokio::fs::write(&tmp_path, &body).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
