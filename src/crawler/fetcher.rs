//! HTTP fetcher implementation
//!
//! This module performs the two kinds of requests a harvest makes:
//! - GET of a listing page, classified into a [`FetchOutcome`]
//! - Streaming download of one document, classified into a [`DownloadOutcome`]
//!
//! Neither function retries; retry policy belongs to the worker pools.

use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::{ParseError, Url};

const DOWNLOAD_PATH: [&str; 4] = ["local", "tools", "exalead", "getFiles.php"];
const PDF_MIME: &str = "application/pdf";
const PDF_EXTENSION: &str = ".pdf";

/// Result of fetching one listing page
#[derive(Debug)]
pub enum FetchOutcome {
    /// 2xx response with its decoded body
    Success { body: String },

    /// Non-2xx response
    HttpStatus { status: u16 },

    /// Connect, read or timeout failure
    Transport { error: String },
}

impl FetchOutcome {
    /// Short description of a failed outcome, for logs and task bookkeeping
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::HttpStatus { status } => Some(format!("HTTP {}", status)),
            Self::Transport { error } => Some(error.clone()),
        }
    }
}

/// Result of one download attempt
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The file was written to `path`
    Saved { path: PathBuf, bytes: u64 },

    /// Bad status, transport or disk failure; worth another attempt
    Retryable { reason: String },

    /// A 200 response that is not a PDF; retrying will not help
    ContentMismatch { content_type: String },
}

/// Fetches a listing page
///
/// # Arguments
///
/// * `client` - The worker's HTTP client
/// * `url` - The page URL
/// * `timeout` - Request timeout covering connect and body read
pub async fn fetch_page(client: &Client, url: &Url, timeout: Duration) -> FetchOutcome {
    let response = match client.get(url.clone()).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            return FetchOutcome::Transport {
                error: e.to_string(),
            }
        }
    };

    let status = response.status();
    if !status.is_success() {
        return FetchOutcome::HttpStatus {
            status: status.as_u16(),
        };
    }

    match response.text().await {
        Ok(body) => FetchOutcome::Success { body },
        Err(e) => FetchOutcome::Transport {
            error: e.to_string(),
        },
    }
}

/// Builds the document download URL for an identifier
///
/// `{base}/local/tools/exalead/getFiles.php?book_id={id}&doc_type=pdf`
pub fn download_url(base: &Url, id: &str) -> Result<Url, ParseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(DOWNLOAD_PATH);
    url.query_pairs_mut()
        .clear()
        .append_pair("book_id", id)
        .append_pair("doc_type", "pdf");
    Ok(url)
}

/// Downloads one document into `dir`
///
/// The body is streamed to `<id>.part` and renamed into place once
/// complete, so a file under its final name is always whole. A header
/// filename already taken by another document gets the identifier appended.
///
/// # Arguments
///
/// * `client` - The worker's HTTP client
/// * `url` - The download URL
/// * `id` - Item identifier, used as the filename fallback
/// * `dir` - Per-query download directory
/// * `timeout` - Request timeout covering connect and body read
pub async fn download_file(
    client: &Client,
    url: &Url,
    id: &str,
    dir: &Path,
    timeout: Duration,
) -> DownloadOutcome {
    let response = match client.get(url.clone()).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => return retryable(e),
    };

    if response.status() != StatusCode::OK {
        return DownloadOutcome::Retryable {
            reason: format!("HTTP {}", response.status().as_u16()),
        };
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !is_pdf(&content_type) {
        return DownloadOutcome::ContentMismatch { content_type };
    }

    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok());
    let filename = filename_from_disposition(disposition, id);
    let own_name = filename_from_disposition(None, id);
    let part_path = dir.join(format!("{}.part", own_name));

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        return retryable(e);
    }

    let bytes = match stream_to_file(response, &part_path).await {
        Ok(bytes) => bytes,
        Err(reason) => {
            tokio::fs::remove_file(&part_path).await.ok();
            return DownloadOutcome::Retryable { reason };
        }
    };

    let final_path = target_path(dir, &filename, id).await;
    if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
        tokio::fs::remove_file(&part_path).await.ok();
        return retryable(e);
    }

    DownloadOutcome::Saved {
        path: final_path,
        bytes,
    }
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64, String> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| e.to_string())?;

    let mut stream = response.bytes_stream();
    let mut total_bytes = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        total_bytes += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| e.to_string())?;
    Ok(total_bytes)
}

/// Picks the final path for a document, never replacing another document
///
/// The identifier's own name (`<id>.pdf`, or `<name>_<id>.pdf` for a taken
/// header name) may be overwritten, since it can only belong to this item.
async fn target_path(dir: &Path, filename: &str, id: &str) -> PathBuf {
    let candidate = dir.join(filename);
    let own_name = filename_from_disposition(None, id);
    if filename == own_name || tokio::fs::metadata(&candidate).await.is_err() {
        return candidate;
    }

    let stem = &filename[..filename.len() - PDF_EXTENSION.len()];
    let renamed = format!("{}_{}{}", stem, sanitize_filename(id), PDF_EXTENSION);
    tracing::warn!(
        item = %id,
        "{} already exists, saving as {}",
        filename,
        renamed
    );
    dir.join(renamed)
}

fn retryable(error: impl std::fmt::Display) -> DownloadOutcome {
    DownloadOutcome::Retryable {
        reason: error.to_string(),
    }
}

/// Compares the MIME essence, ignoring parameters and case
fn is_pdf(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case(PDF_MIME))
        .unwrap_or(false)
}

/// Derives the saved filename from a `Content-Disposition` header
///
/// Takes the value after the last `filename=`, strips quotes and path
/// separators, and falls back to the identifier when nothing usable is left.
/// The result always ends in `.pdf`.
pub fn filename_from_disposition(header: Option<&str>, fallback: &str) -> String {
    let from_header = header
        .and_then(|h| h.rsplit_once("filename="))
        .map(|(_, value)| value.split(';').next().unwrap_or_default())
        .map(|value| sanitize_filename(value.trim().trim_matches('"')))
        .filter(|name| !name.is_empty());

    let mut name = from_header.unwrap_or_else(|| sanitize_filename(fallback));
    if name.is_empty() {
        name = "document".to_string();
    }

    if !name.to_ascii_lowercase().ends_with(PDF_EXTENSION) {
        name.push_str(PDF_EXTENSION);
    }
    name
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').to_string()
}
