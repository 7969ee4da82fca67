//! Attachment input: local files and HTTP(S) URLs, loaded into memory with a
//! MIME type.
//!
//! Every stage downstream works on byte buffers, so an attachment is fully
//! read here. The MIME type comes from the server's `Content-Type` when
//! there is one, otherwise from the file extension.

use crate::error::StageError;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Fallback MIME type for unknown content.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// One raw attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Guess a MIME type from a file name's extension.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("tif" | "tiff") => "image/tiff",
        Some("txt" | "log") => "text/plain",
        Some("csv") => "text/csv",
        Some("htm" | "html") => "text/html",
        Some("md") => "text/markdown",
        Some("xml") => "text/xml",
        _ => OCTET_STREAM,
    }
}

/// Read a local file as an attachment. `mime` overrides the guess.
pub async fn read_local(path: &Path, mime: Option<&str>) -> Result<Attachment, StageError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = tokio::fs::read(path).await.map_err(|e| StageError::FetchFailed {
        url: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mime = mime.map(str::to_string).unwrap_or_else(|| mime_from_name(&name).to_string());
    debug!("Read {} ({} bytes, {})", path.display(), bytes.len(), mime);
    Ok(Attachment { name, mime, bytes })
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| e.to_string())
}

/// Download one attachment.
pub async fn fetch_attachment(url: &str, timeout_secs: u64) -> Result<Attachment, StageError> {
    let client = http_client(timeout_secs).map_err(|e| fetch_failed(url, e))?;
    fetch_with(&client, url, timeout_secs).await
}

/// Download several attachments, at most `concurrency` at a time.
///
/// Results are in the same order as `urls`.
pub async fn fetch_attachments(
    urls: &[String],
    timeout_secs: u64,
    concurrency: usize,
) -> Vec<Result<Attachment, StageError>> {
    load_sources(urls, timeout_secs, concurrency).await
}

/// Load a mix of local paths and URLs, at most `concurrency` at a time.
///
/// Results are in the same order as `sources`.
pub async fn load_sources(
    sources: &[String],
    timeout_secs: u64,
    concurrency: usize,
) -> Vec<Result<Attachment, StageError>> {
    let client = http_client(timeout_secs);
    let client = &client;
    stream::iter(sources.iter().map(|source| async move {
        if is_url(source) {
            match client {
                Ok(c) => fetch_with(c, source, timeout_secs).await,
                Err(e) => Err(fetch_failed(source, e)),
            }
        } else {
            read_local(Path::new(source), None).await
        }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}

/// Display name of a source: the URL's last path segment or the file name.
pub fn source_name(source: &str) -> String {
    if is_url(source) {
        filename_from_url(source)
    } else {
        Path::new(source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.to_string())
    }
}

async fn fetch_with(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<Attachment, StageError> {
    info!("Downloading attachment from: {}", url);

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            StageError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            fetch_failed(url, e)
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(StageError::FetchFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let name = filename_from_url(url);
    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && m != OCTET_STREAM)
        .unwrap_or_else(|| mime_from_name(&name).to_string());

    let bytes = response.bytes().await.map_err(map_err)?.to_vec();
    debug!("Downloaded {} ({} bytes, {})", name, bytes.len(), mime);
    Ok(Attachment { name, mime, bytes })
}

fn fetch_failed(url: &str, e: impl std::fmt::Display) -> StageError {
    StageError::FetchFailed {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// Last non-empty path segment of `url`, or `attachment`.
pub fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| "attachment".to_string())
}
