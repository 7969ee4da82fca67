//! Result types produced by the pipeline stages and the processor.

use crate::error::StageError;
use serde::{Deserialize, Serialize};

/// A PDF produced by a stage, with its exact page count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfOutput {
    pub pdf: Vec<u8>,
    pub page_count: u32,
}

/// An attachment left out of a batch, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub name: String,
    pub reason: StageError,
}

/// Outcome of [`crate::process::DocumentProcessor`] operations.
///
/// Never an `Err`: every failure is reported through `success == false`
/// and `error`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    /// Attachment name, or the merged document name for batches.
    pub original_name: String,
    /// Final PDF. Omitted from JSON.
    #[serde(skip)]
    pub pdf_bytes: Option<Vec<u8>>,
    pub download_url: Option<String>,
    /// Size of `pdf_bytes` in bytes.
    pub file_size: usize,
    pub page_count: u32,
    pub was_converted: bool,
    pub was_stamped: bool,
    pub error: Option<String>,
    pub storage_path: Option<String>,
    /// Batch attachments that were not included.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<SkippedFile>,
}

impl ProcessingResult {
    pub fn failure(original_name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            original_name: original_name.into(),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Names of skipped batch attachments.
    pub fn skipped_names(&self) -> Vec<&str> {
        self.skipped_files.iter().map(|s| s.name.as_str()).collect()
    }
}
