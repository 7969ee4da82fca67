//! # registratura
//!
//! Registration numbers, format conversion, merging and stamping for a
//! municipal document registry.
//!
//! A citizen submission arrives as one or more attachments (scans, photos,
//! text files, PDFs). This crate turns it into one *official document*: a
//! single PDF whose first page bears a registration stamp with the issuing
//! organization, a unique `PREFIX-YYYY-NNNNNN` number, the received date and
//! time, the handling department and a QR code linking to a tracking page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! submission
//!  │
//!  ├─ 0. Allocate  unique year-scoped number (transactional counter, retried)
//!  ├─ 1. Input     local files or URLs → bytes + MIME type
//!  ├─ 2. Convert   PDF pass-through / image page / paginated text
//!  ├─ 3. Merge     concatenate in order, skip unparseable inputs
//!  ├─ 4. Stamp     rasterise the stamp (PNG, optional QR) and place it
//!  └─ 5. Store     optional upload under registratura/processed/{number}/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use registratura::{
//!     AllocateOptions, Allocator, Attachment, DocumentProcessor, InMemoryCounterStore,
//!     PipelineConfig, ProcessOptions, StampConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let allocator = Allocator::new(Arc::new(InMemoryCounterStore::new()));
//!     let number = allocator.allocate(&AllocateOptions::default()).await?;
//!
//!     let processor = DocumentProcessor::new(
//!         PipelineConfig::builder()
//!             .organization_name("Primăria Municipiului Brașov")
//!             .tracking_base_url("https://registratura.example.ro/track")
//!             .build()?,
//!     );
//!     let files = vec![
//!         Attachment::new("cerere.txt", "text/plain", b"Solicit ...".to_vec()),
//!         Attachment::new("act.png", "image/png", std::fs::read("act.png")?),
//!     ];
//!     let stamp = StampConfig::new(number.to_string(), chrono::Utc::now());
//!     let result = processor
//!         .process_and_merge(&files, &ProcessOptions::new(stamp))
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `registratura` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! registratura = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod fonts;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod registry;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, RegistryError, StageError, StoreError};
pub use output::{PdfOutput, ProcessingResult, SkippedFile};
pub use pipeline::convert::{convert_to_pdf, is_convertible_to_pdf, InputKind};
pub use pipeline::input::{fetch_attachment, fetch_attachments, load_sources, Attachment};
pub use pipeline::merge::{merge_pdfs, MergeOutput};
pub use pipeline::overlay::{PdfStamper, PlacementOptions, StampPosition};
pub use pipeline::pdf::count_pages;
pub use pipeline::stamp::{QrEncoder, StampConfig, StampRenderer, StampStyle};
pub use process::{build_tracking_url, DocumentProcessor, ProcessOptions};
pub use progress::{ProcessingProgressCallback, ProgressCallback};
pub use registry::{
    AdminGrant, AllocateOptions, Allocator, CounterStore, InMemoryCounterStore,
    JsonFileCounterStore, RegistrationNumber, RetryPolicy,
};
pub use storage::{BlobStore, LocalBlobStore, MemoryBlobStore, UploadMetadata};
