//! Error types for the registratura library.
//!
//! Two families of errors reflect two distinct failure modes:
//!
//! * [`RegistryError`] / [`PipelineError`] are **fatal**: a registration
//!   number cannot be issued, or the pipeline was configured with values it
//!   cannot honour. They are returned as `Err(..)` and end the request.
//!
//! * [`StageError`] is **non-fatal**: one attachment could not be fetched,
//!   converted, merged or stamped. Batches record it per item
//!   ([`crate::output::SkippedFile`], [`crate::pipeline::merge::SkippedInput`])
//!   and [`crate::output::ProcessingResult`] carries its message, so a batch
//!   can continue past it.
//!
//! [`StoreError`] is the vocabulary of counter-store backends. The allocator
//! retries the transient variants and wraps everything else.

use thiserror::Error;

/// Highest sequence number a single year can issue.
pub const MAX_SEQUENCE: u32 = 999_999;

/// Fatal errors returned by the registration-number allocator.
#[derive(Debug, Error)]
pub enum RegistryError {
    // ── Validation errors ────────────────────────────────────────────────
    /// Padding outside the supported 1–10 digit range.
    #[error("Invalid padding {0}: registration numbers are padded to 1–10 digits")]
    InvalidPadding(u8),

    /// Empty or whitespace-only prefix.
    #[error("Invalid prefix {0:?}: prefix must be non-empty")]
    InvalidPrefix(String),

    /// Year outside [2000, 2100].
    #[error("Invalid year {0}: year must be between 2000 and 2100")]
    InvalidYear(i32),

    /// Stored counter record is structurally invalid.
    #[error("Counter record is corrupt: {detail}\nInspect the store and repair it with an administrative reset.")]
    CorruptCounter { detail: String },

    /// Sequence space for the year is exhausted.
    #[error("Registration numbers for {year} are exhausted (maximum {max})")]
    Overflow { year: i32, max: u32 },

    /// Reset requested with a start value the counter cannot hold.
    #[error("Invalid reset start {0}: must be between 0 and 999999")]
    InvalidResetStart(u32),

    // ── Store errors ─────────────────────────────────────────────────────
    /// Every attempt hit a transient store failure.
    #[error("Registration number allocation failed after {attempts} attempts: {source}")]
    AllocationFailed {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Non-transient store failure.
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Validation and overflow errors fail immediately, never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Errors reported by a [`crate::registry::CounterStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent writer committed first; the transaction was aborted.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Backend temporarily unreachable.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// Persisted data could not be decoded.
    #[error("Counter store data is corrupt: {0}")]
    Corrupt(String),

    /// Local I/O failure.
    #[error("Counter store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Conflicts and temporary unavailability are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// Error returned by the closure passed to a store transaction.
///
/// Separates "the transaction body refused to write" from "the store could
/// not complete the transaction".
#[derive(Debug, Error)]
pub enum TransactError {
    /// The transaction body rejected the current record; nothing was written.
    #[error(transparent)]
    Rejected(RegistryError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fatal pipeline configuration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A non-fatal error for a single pipeline stage or attachment.
///
/// Stored in per-item results so callers can inspect partial success
/// rather than losing the whole submission to one bad attachment.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    // ── Input errors ─────────────────────────────────────────────────────
    /// Zero-byte input.
    #[error("'{name}' is empty")]
    EmptyInput { name: String },

    /// MIME type outside the convertible set.
    #[error("'{name}' has unsupported type '{mime}'\nSupported: application/pdf, image/*, text/*")]
    UnsupportedType { name: String, mime: String },

    /// Attachment download failed.
    #[error("Failed to download '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// Attachment download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Processing errors ────────────────────────────────────────────────
    /// Decoding or PDF generation failed for a declared-convertible input.
    #[error("Conversion of '{name}' failed: {detail}")]
    ConversionFailed { name: String, detail: String },

    /// PDF bytes could not be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// Merge was called with no inputs.
    #[error("Nothing to merge: no input documents")]
    NothingToMerge,

    /// Every merge input was skipped or had no pages.
    #[error("Merge produced no pages ({skipped} of {total} inputs skipped)")]
    NoPagesMerged { total: usize, skipped: usize },

    /// No attachment of a batch could be converted.
    #[error("No attachment could be converted. Skipped: {}", skipped.join(", "))]
    NothingConverted { skipped: Vec<String> },

    /// Stamp rasterisation failed.
    #[error("Stamp rendering failed: {0}")]
    RenderFailed(String),

    /// Stamp or watermark could not be applied to the PDF.
    #[error("Stamping failed: {0}")]
    StampFailed(String),

    // ── Output errors ────────────────────────────────────────────────────
    /// Blob upload failed.
    #[error("Upload to '{path}' failed: {reason}")]
    UploadFailed { path: String, reason: String },

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a panicked blocking task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    pub(crate) fn corrupt(name: &str, e: impl std::fmt::Display) -> Self {
        StageError::CorruptPdf {
            name: name.to_string(),
            detail: e.to_string(),
        }
    }

    pub(crate) fn conversion(name: &str, e: impl std::fmt::Display) -> Self {
        StageError::ConversionFailed {
            name: name.to_string(),
            detail: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for StageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StageError::Internal(format!("blocking task failed: {e}"))
    }
}
