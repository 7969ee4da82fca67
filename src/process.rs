//! End-to-end document processing: convert, merge, stamp, upload.
//!
//! [`DocumentProcessor`] is the outermost boundary of the pipeline. Its
//! operations always return a [`ProcessingResult`]; every failure, including
//! a panic inside a blocking stage, becomes `success == false` with an error
//! message.
//!
//! ```text
//! process_one:        attachment ──▶ convert ──▶ stamp ──▶ (upload)
//!
//! process_and_merge:  a₁ ──▶ convert ─┐
//!                     a₂ ──▶ convert ─┼──▶ merge ──▶ stamp page 1 ──▶ (upload)
//!                     a₃ ──▶ ✗ skip   │
//!                     a₄ ──▶ convert ─┘
//! ```
//!
//! PDF and raster work is CPU-bound and runs on the blocking thread pool.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::output::{PdfOutput, ProcessingResult, SkippedFile};
use crate::pipeline::convert::{convert_to_pdf, is_convertible_to_pdf, InputKind};
use crate::pipeline::input::{self, Attachment};
use crate::pipeline::merge::merge_pdfs;
use crate::pipeline::overlay::{PdfStamper, PlacementOptions};
use crate::pipeline::stamp::{QrEncoder, StampConfig, StampRenderer};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::storage::{storage_path, BlobStore, UploadMetadata};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Format the URL encoded in a stamp's QR code.
///
/// `https://x.ro/track/` + `REG-2025-000042` → `https://x.ro/track/REG-2025-000042`
pub fn build_tracking_url(registration_number: &str, base_url: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        registration_number.trim()
    )
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Stamp content. Missing organization, department and tracking URL are
    /// filled from the [`PipelineConfig`].
    pub stamp: StampConfig,
    /// Persist the result through the configured [`BlobStore`].
    pub upload_to_storage: bool,
    /// File name used for the merged document's storage path.
    /// Default: the registration number.
    pub merged_name: Option<String>,
}

impl ProcessOptions {
    pub fn new(stamp: StampConfig) -> Self {
        Self {
            stamp,
            upload_to_storage: false,
            merged_name: None,
        }
    }

    pub fn upload(mut self, upload: bool) -> Self {
        self.upload_to_storage = upload;
        self
    }

    pub fn merged_name(mut self, name: impl Into<String>) -> Self {
        self.merged_name = Some(name.into());
        self
    }
}

/// Runs attachments through the pipeline.
pub struct DocumentProcessor {
    config: PipelineConfig,
    stamper: PdfStamper,
    storage: Option<Arc<dyn BlobStore>>,
}

impl std::fmt::Debug for DocumentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentProcessor")
            .field("config", &self.config)
            .field("stamper", &self.stamper)
            .field("storage", &self.storage.as_ref().map(|_| "<dyn BlobStore>"))
            .finish()
    }
}

impl DocumentProcessor {
    pub fn new(config: PipelineConfig) -> Self {
        let renderer =
            StampRenderer::new(config.stamp_style.clone()).with_time_zone(config.time_zone);
        Self {
            config,
            stamper: PdfStamper::new(renderer),
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn BlobStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_qr_encoder(mut self, encoder: Arc<dyn QrEncoder>) -> Self {
        let renderer = self.stamper.renderer().clone().with_qr_encoder(encoder);
        self.stamper = PdfStamper::new(renderer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn progress(&self) -> ProgressCallback {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    /// Fill stamp fields the request left empty from the configuration.
    fn effective_stamp(&self, stamp: &StampConfig) -> StampConfig {
        let mut s = stamp.clone();
        if s.organization_name.is_none() {
            s.organization_name = Some(self.config.organization_name.clone());
        }
        if s.department.is_none() {
            s.department = self.config.default_department.clone();
        }
        if s.tracking_url.is_none() {
            s.tracking_url = self
                .config
                .tracking_base_url
                .as_deref()
                .map(|base| build_tracking_url(&s.registration_number, base));
        }
        s
    }

    // ── Single attachment ────────────────────────────────────────────────

    /// Convert one attachment, stamp it, and optionally upload it.
    pub async fn process_one(&self, attachment: &Attachment, opts: &ProcessOptions) -> ProcessingResult {
        match self.try_process_one(attachment, opts).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Processing '{}' failed: {}", attachment.name, e);
                ProcessingResult::failure(&attachment.name, e)
            }
        }
    }

    async fn try_process_one(
        &self,
        attachment: &Attachment,
        opts: &ProcessOptions,
    ) -> Result<ProcessingResult, StageError> {
        if !is_convertible_to_pdf(&attachment.mime) {
            return Err(StageError::UnsupportedType {
                name: attachment.name.clone(),
                mime: attachment.mime.clone(),
            });
        }
        let was_converted = InputKind::from_mime(&attachment.mime) != InputKind::Pdf;

        let converted = self.convert(attachment).await?;
        let stamped = self.stamp(converted.pdf, &opts.stamp, self.config.placement).await?;

        let mut result = ProcessingResult {
            success: true,
            original_name: attachment.name.clone(),
            file_size: stamped.pdf.len(),
            page_count: stamped.page_count,
            was_converted,
            was_stamped: true,
            ..ProcessingResult::default()
        };

        if opts.upload_to_storage {
            let meta = UploadMetadata {
                original_name: attachment.name.clone(),
                original_mime: attachment.mime.clone(),
                registration_number: opts.stamp.registration_number.clone(),
                was_converted,
                processed_at: Utc::now(),
                source_count: 1,
            };
            let path = storage_path(
                &self.config.storage_prefix,
                &opts.stamp.registration_number,
                &attachment.name,
            );
            result.download_url = Some(self.upload(&path, &stamped.pdf, &meta).await?);
            result.storage_path = Some(path);
        }

        info!(
            "Processed '{}' as {} ({} pages, {} bytes)",
            attachment.name, opts.stamp.registration_number, result.page_count, result.file_size
        );
        result.pdf_bytes = Some(stamped.pdf);
        Ok(result)
    }

    // ── Batches ──────────────────────────────────────────────────────────

    /// Convert every attachment, merge them in order into one document,
    /// stamp its first page, and optionally upload it.
    ///
    /// Attachments that are unsupported or fail conversion are skipped and
    /// listed in [`ProcessingResult::skipped_files`].
    pub async fn process_and_merge(&self, attachments: &[Attachment], opts: &ProcessOptions) -> ProcessingResult {
        self.merge_batch(attachments, Vec::new(), opts).await
    }

    /// Load `sources` (local paths or URLs) and run them through
    /// [`Self::process_and_merge`]. Sources that cannot be read or
    /// downloaded are reported as skipped attachments.
    pub async fn load_and_merge(&self, sources: &[String], opts: &ProcessOptions) -> ProcessingResult {
        let loaded = input::load_sources(
            sources,
            self.config.fetch_timeout_secs,
            self.config.fetch_concurrency,
        )
        .await;
        let mut attachments = Vec::with_capacity(loaded.len());
        let mut skipped = Vec::new();
        for (source, result) in sources.iter().zip(loaded) {
            match result {
                Ok(a) => attachments.push(a),
                Err(reason) => {
                    warn!("Skipping '{}': {}", source, reason);
                    skipped.push(SkippedFile {
                        name: input::source_name(source),
                        reason,
                    });
                }
            }
        }
        self.merge_batch(&attachments, skipped, opts).await
    }

    async fn merge_batch(
        &self,
        attachments: &[Attachment],
        skipped: Vec<SkippedFile>,
        opts: &ProcessOptions,
    ) -> ProcessingResult {
        let name = opts
            .merged_name
            .clone()
            .unwrap_or_else(|| opts.stamp.registration_number.clone());
        let mut skipped = skipped;
        match self.try_merge_batch(attachments, &mut skipped, opts, &name).await {
            Ok(mut result) => {
                result.skipped_files = skipped;
                result
            }
            Err(e) => {
                warn!("Processing batch '{}' failed: {}", name, e);
                let mut result = ProcessingResult::failure(&name, e);
                result.skipped_files = skipped;
                result
            }
        }
    }

    async fn try_merge_batch(
        &self,
        attachments: &[Attachment],
        skipped: &mut Vec<SkippedFile>,
        opts: &ProcessOptions,
        name: &str,
    ) -> Result<ProcessingResult, StageError> {
        let progress = self.progress();
        let total = attachments.len();
        progress.on_batch_start(total);

        let mut converted: Vec<(&Attachment, PdfOutput)> = Vec::with_capacity(total);
        for (i, attachment) in attachments.iter().enumerate() {
            let index = i + 1;
            progress.on_file_start(index, total, &attachment.name);
            let outcome = if is_convertible_to_pdf(&attachment.mime) {
                self.convert(attachment).await
            } else {
                Err(StageError::UnsupportedType {
                    name: attachment.name.clone(),
                    mime: attachment.mime.clone(),
                })
            };
            match outcome {
                Ok(pdf) => {
                    progress.on_file_converted(index, total, &attachment.name, pdf.page_count);
                    converted.push((attachment, pdf));
                }
                Err(reason) => {
                    warn!("Skipping '{}': {}", attachment.name, reason);
                    progress.on_file_skipped(index, total, &attachment.name, &reason.to_string());
                    skipped.push(SkippedFile {
                        name: attachment.name.clone(),
                        reason,
                    });
                }
            }
        }
        progress.on_batch_complete(converted.len(), total - converted.len());

        if converted.is_empty() {
            return Err(StageError::NothingConverted {
                skipped: skipped.iter().map(|s| s.name.clone()).collect(),
            });
        }

        let (sources, pdfs): (Vec<&Attachment>, Vec<Vec<u8>>) =
            converted.into_iter().map(|(a, out)| (a, out.pdf)).unzip();
        let merged = tokio::task::spawn_blocking(move || merge_pdfs(&pdfs)).await??;
        let mut included = Vec::with_capacity(sources.len());
        for (i, source) in sources.into_iter().enumerate() {
            match merged.skipped.iter().find(|s| s.index == i) {
                Some(s) => skipped.push(SkippedFile {
                    name: source.name.clone(),
                    reason: s.reason.clone(),
                }),
                None => included.push(source),
            }
        }

        let was_converted =
            included.len() > 1 || included.iter().any(|a| InputKind::from_mime(&a.mime) != InputKind::Pdf);

        let placement = PlacementOptions {
            all_pages: false,
            ..self.config.placement
        };
        let stamped = self.stamp(merged.output.pdf, &opts.stamp, placement).await?;

        let mut result = ProcessingResult {
            success: true,
            original_name: name.to_string(),
            file_size: stamped.pdf.len(),
            page_count: stamped.page_count,
            was_converted,
            was_stamped: true,
            ..ProcessingResult::default()
        };

        if opts.upload_to_storage {
            let mut mimes: Vec<&str> = included.iter().map(|a| a.mime.as_str()).collect();
            mimes.sort_unstable();
            mimes.dedup();
            let meta = UploadMetadata {
                original_name: name.to_string(),
                original_mime: mimes.join(", "),
                registration_number: opts.stamp.registration_number.clone(),
                was_converted,
                processed_at: Utc::now(),
                source_count: included.len(),
            };
            let path = storage_path(&self.config.storage_prefix, &opts.stamp.registration_number, name);
            result.download_url = Some(self.upload(&path, &stamped.pdf, &meta).await?);
            result.storage_path = Some(path);
        }

        info!(
            "Processed batch '{}' as {}: {} of {} attachments, {} pages",
            name,
            opts.stamp.registration_number,
            included.len(),
            total,
            result.page_count
        );
        result.pdf_bytes = Some(stamped.pdf);
        Ok(result)
    }

    // ── Stages ───────────────────────────────────────────────────────────

    async fn convert(&self, attachment: &Attachment) -> Result<PdfOutput, StageError> {
        let bytes = attachment.bytes.clone();
        let mime = attachment.mime.clone();
        let name = attachment.name.clone();
        tokio::task::spawn_blocking(move || convert_to_pdf(&bytes, &mime, &name)).await?
    }

    async fn stamp(
        &self,
        pdf: Vec<u8>,
        stamp: &StampConfig,
        placement: PlacementOptions,
    ) -> Result<PdfOutput, StageError> {
        let stamper = self.stamper.clone();
        let config = self.effective_stamp(stamp);
        tokio::task::spawn_blocking(move || stamper.stamp(&pdf, &config, &placement)).await?
    }

    async fn upload(&self, path: &str, pdf: &[u8], meta: &UploadMetadata) -> Result<String, StageError> {
        let store = self.storage.as_ref().ok_or_else(|| StageError::UploadFailed {
            path: path.to_string(),
            reason: "no blob store configured".into(),
        })?;
        store.put(path, pdf, "application/pdf", meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pdf::{DocumentBuilder, A4_HEIGHT, A4_WIDTH};
    use crate::storage::MemoryBlobStore;
    use chrono::TimeZone;
    use image::{ImageFormat, Rgba, RgbaImage};
    use lopdf::Dictionary;
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([30, 120, 200, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn blank_pdf(pages: usize) -> Vec<u8> {
        let mut b = DocumentBuilder::new();
        for _ in 0..pages {
            b.add_page(A4_WIDTH, A4_HEIGHT, Dictionary::new(), vec![]).unwrap();
        }
        b.finish().unwrap()
    }

    fn options() -> ProcessOptions {
        ProcessOptions::new(StampConfig::new(
            "REG-2025-000042",
            Utc.with_ymd_and_hms(2025, 3, 15, 12, 30, 0).unwrap(),
        ))
    }

    fn processor() -> DocumentProcessor {
        DocumentProcessor::new(PipelineConfig::default())
    }

    #[test]
    fn tracking_url_trims_slashes() {
        assert_eq!(
            build_tracking_url("REG-2025-000042", "https://x.ro/track/"),
            "https://x.ro/track/REG-2025-000042"
        );
        assert_eq!(
            build_tracking_url("REG-2025-000042", "https://x.ro/track"),
            "https://x.ro/track/REG-2025-000042"
        );
    }

    #[test]
    fn effective_stamp_fills_from_config() {
        let config = PipelineConfig::builder()
            .organization_name("Primăria Sibiu")
            .default_department("Registratură")
            .tracking_base_url("https://x.ro/t")
            .build()
            .unwrap();
        let p = DocumentProcessor::new(config);
        let s = p.effective_stamp(&options().stamp);
        assert_eq!(s.organization_name.as_deref(), Some("Primăria Sibiu"));
        assert_eq!(s.department.as_deref(), Some("Registratură"));
        assert_eq!(s.tracking_url.as_deref(), Some("https://x.ro/t/REG-2025-000042"));

        let explicit = options().stamp.department("Urbanism");
        assert_eq!(p.effective_stamp(&explicit).department.as_deref(), Some("Urbanism"));
    }

    #[tokio::test]
    async fn process_one_png() {
        let a = Attachment::new("scan.png", "image/png", png(40, 30));
        let r = processor().process_one(&a, &options()).await;
        assert!(r.success, "{:?}", r.error);
        assert!(r.was_converted);
        assert!(r.was_stamped);
        assert_eq!(r.page_count, 1);
        assert_eq!(r.file_size, r.pdf_bytes.as_ref().unwrap().len());
        assert!(r.download_url.is_none());
    }

    #[tokio::test]
    async fn process_one_pdf_is_not_converted() {
        let a = Attachment::new("act.pdf", "application/pdf", blank_pdf(2));
        let r = processor().process_one(&a, &options()).await;
        assert!(r.success);
        assert!(!r.was_converted);
        assert_eq!(r.page_count, 2);
    }

    #[tokio::test]
    async fn process_one_rejects_unsupported_type() {
        let a = Attachment::new("arhiva.zip", "application/zip", vec![1, 2, 3]);
        let r = processor().process_one(&a, &options()).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("unsupported type"));
        assert!(r.pdf_bytes.is_none());
    }

    #[tokio::test]
    async fn process_one_upload_without_store_fails_cleanly() {
        let a = Attachment::new("nota.txt", "text/plain", b"Salut".to_vec());
        let r = processor().process_one(&a, &options().upload(true)).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("no blob store"));
    }

    #[tokio::test]
    async fn process_one_uploads() {
        let store = Arc::new(MemoryBlobStore::new());
        let p = processor().with_storage(store.clone());
        let a = Attachment::new("cerere.txt", "text/plain", b"Solicit eliberarea unui certificat.".to_vec());
        let r = p.process_one(&a, &options().upload(true)).await;
        assert!(r.success, "{:?}", r.error);
        let path = "registratura/processed/REG-2025-000042/cerere.pdf";
        assert_eq!(r.storage_path.as_deref(), Some(path));
        assert_eq!(r.download_url.as_deref(), Some("memory://registratura/processed/REG-2025-000042/cerere.pdf"));
        let blob = store.get(path).unwrap();
        assert_eq!(blob.content_type, "application/pdf");
        assert_eq!(blob.metadata.original_mime, "text/plain");
        assert!(blob.metadata.was_converted);
    }

    #[tokio::test]
    async fn batch_with_nothing_convertible_names_skipped_files() {
        let files = vec![
            Attachment::new("a.zip", "application/zip", vec![1]),
            Attachment::new("b.png", "image/png", b"not really a png".to_vec()),
        ];
        let r = processor().process_and_merge(&files, &options()).await;
        assert!(!r.success);
        let err = r.error.clone().unwrap();
        assert!(err.contains("a.zip") && err.contains("b.png"), "{err}");
        assert_eq!(r.skipped_names(), vec!["a.zip", "b.png"]);
    }

    #[tokio::test]
    async fn batch_of_single_pdf_keeps_was_converted_false() {
        let files = vec![Attachment::new("act.pdf", "application/pdf", blank_pdf(3))];
        let r = processor().process_and_merge(&files, &options()).await;
        assert!(r.success);
        assert!(!r.was_converted);
        assert_eq!(r.page_count, 3);
        assert_eq!(r.original_name, "REG-2025-000042");
    }

    #[tokio::test]
    async fn empty_batch_fails() {
        let r = processor().process_and_merge(&[], &options()).await;
        assert!(!r.success);
        assert!(r.error.is_some());
    }
}
