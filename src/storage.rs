//! Blob storage for processed documents.
//!
//! The processor only needs `put(path, bytes, content type, metadata) ->
//! download URL`, modelled by [`BlobStore`]. Two implementations ship:
//!
//! * [`LocalBlobStore`] writes under a root directory, with a
//!   `<file>.meta.json` sidecar holding the metadata.
//! * [`MemoryBlobStore`] keeps blobs in memory.

use crate::error::StageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Descriptive metadata stored alongside an uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub original_name: String,
    pub original_mime: String,
    pub registration_number: String,
    pub was_converted: bool,
    pub processed_at: DateTime<Utc>,
    /// Number of attachments the document was built from.
    pub source_count: usize,
}

/// Destination for processed PDFs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return a download URL.
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> Result<String, StageError>;
}

/// `{prefix}/{registration_number}/{stem}.pdf`, where `stem` is `file_name`
/// without its last extension and with unsafe characters replaced by `_`.
pub fn storage_path(prefix: &str, registration_number: &str, file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = RE_UNSAFE_CHARS.replace_all(&stem, "_");
    let stem = if stem.is_empty() { "document" } else { &*stem };
    let reg = RE_UNSAFE_CHARS.replace_all(registration_number, "_");
    format!("{}/{}/{}.pdf", prefix.trim_matches('/'), reg, stem)
}

fn upload_failed(path: &str, e: impl std::fmt::Display) -> StageError {
    StageError::UploadFailed {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

/// Reject absolute paths and `..` so uploads stay under the store root.
fn relative_path(path: &str) -> Result<PathBuf, StageError> {
    let p = Path::new(path);
    if path.is_empty()
        || p.components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(upload_failed(path, "path must be relative and must not contain '..'"));
    }
    Ok(p.to_path_buf())
}

// ── Local filesystem ─────────────────────────────────────────────────────

/// Stores blobs as files under `root`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: Option<reqwest::Url>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar<'a> {
    content_type: &'a str,
    size: usize,
    #[serde(flatten)]
    metadata: &'a UploadMetadata,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serve download URLs from `base` instead of `file://` URLs.
    pub fn with_public_base_url(mut self, base: &str) -> Result<Self, StageError> {
        let normalized = format!("{}/", base.trim_end_matches('/'));
        let url = reqwest::Url::parse(&normalized).map_err(|e| upload_failed(base, e))?;
        self.public_base_url = Some(url);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut tmp = target.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, target).await
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> Result<String, StageError> {
        let target = self.root.join(relative_path(path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| upload_failed(path, e))?;
        }
        Self::write_atomic(&target, bytes)
            .await
            .map_err(|e| upload_failed(path, e))?;

        let sidecar = serde_json::to_vec_pretty(&Sidecar {
            content_type,
            size: bytes.len(),
            metadata,
        })
        .map_err(|e| upload_failed(path, e))?;
        let mut meta_path = target.as_os_str().to_owned();
        meta_path.push(".meta.json");
        Self::write_atomic(Path::new(&meta_path), &sidecar)
            .await
            .map_err(|e| upload_failed(path, e))?;

        let url = match &self.public_base_url {
            Some(base) => base.join(path).map_err(|e| upload_failed(path, e))?,
            None => {
                let absolute = std::path::absolute(&target).map_err(|e| upload_failed(path, e))?;
                reqwest::Url::from_file_path(&absolute)
                    .map_err(|_| upload_failed(path, "cannot express path as a file URL"))?
            }
        };
        info!("Stored {} ({} bytes) at {}", path, bytes.len(), target.display());
        Ok(url.to_string())
    }
}

// ── In memory ────────────────────────────────────────────────────────────

/// A blob held by [`MemoryBlobStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub metadata: UploadMetadata,
}

/// Keeps blobs in a map. URLs have the form `memory://{path}`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    failure: Option<String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every `put` fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn get(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.lock().ok()?.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.blobs
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> Result<String, StageError> {
        if let Some(reason) = &self.failure {
            return Err(upload_failed(path, reason));
        }
        relative_path(path)?;
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| upload_failed(path, "store lock poisoned"))?;
        blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        debug!("Stored {} ({} bytes) in memory", path, bytes.len());
        Ok(format!("memory://{path}"))
    }
}
