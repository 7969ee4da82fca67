//! Configuration for the document pipeline.
//!
//! Every knob of [`crate::DocumentProcessor`] lives in [`PipelineConfig`],
//! built via [`PipelineConfigBuilder`]. Allocator settings are separate
//! ([`crate::registry::AllocateOptions`], [`crate::registry::RetryPolicy`])
//! since allocation happens upstream of processing.

use crate::error::PipelineError;
use crate::pipeline::overlay::{PlacementOptions, StampPosition};
use crate::pipeline::stamp::{StampStyle, DEFAULT_ORGANIZATION};
use crate::progress::ProgressCallback;
use chrono_tz::Tz;
use std::fmt;

/// Storage prefix under which processed documents are uploaded.
pub const DEFAULT_STORAGE_PREFIX: &str = "registratura/processed";

/// Configuration for [`crate::DocumentProcessor`].
///
/// # Example
/// ```rust
/// use registratura::{PipelineConfig, StampPosition};
///
/// let config = PipelineConfig::builder()
///     .organization_name("Primăria Municipiului Brașov")
///     .position(StampPosition::BottomRight)
///     .opacity(0.9)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Printed on the first stamp line when a request does not name one.
    /// Default: `"Primăria"`.
    pub organization_name: String,

    /// Department printed when a request does not name one. Default: None.
    pub default_department: Option<String>,

    /// Base URL for [`crate::process::build_tracking_url`]. When set and a
    /// request carries no explicit tracking URL, one is derived from the
    /// registration number. Default: None (no QR code).
    pub tracking_base_url: Option<String>,

    /// Zone for the date and time printed on stamps. Default: Europe/Bucharest.
    pub time_zone: Tz,

    /// Stamp geometry and colours.
    pub stamp_style: StampStyle,

    /// Stamp corner, margin, opacity and scale.
    pub placement: PlacementOptions,

    /// Blob-storage prefix. Default: `registratura/processed`.
    pub storage_prefix: String,

    /// Download timeout for URL attachments in seconds. Default: 120.
    pub fetch_timeout_secs: u64,

    /// Parallel URL downloads. Default: 4.
    pub fetch_concurrency: usize,

    /// Optional per-attachment progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            organization_name: DEFAULT_ORGANIZATION.to_string(),
            default_department: None,
            tracking_base_url: None,
            time_zone: chrono_tz::Europe::Bucharest,
            stamp_style: StampStyle::default(),
            placement: PlacementOptions::default(),
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            fetch_timeout_secs: 120,
            fetch_concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("organization_name", &self.organization_name)
            .field("default_department", &self.default_department)
            .field("tracking_base_url", &self.tracking_base_url)
            .field("time_zone", &self.time_zone)
            .field("stamp_style", &self.stamp_style)
            .field("placement", &self.placement)
            .field("storage_prefix", &self.storage_prefix)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ProcessingProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn organization_name(mut self, name: impl Into<String>) -> Self {
        self.config.organization_name = name.into();
        self
    }

    pub fn default_department(mut self, name: impl Into<String>) -> Self {
        self.config.default_department = Some(name.into());
        self
    }

    pub fn tracking_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.tracking_base_url = Some(url.into());
        self
    }

    pub fn time_zone(mut self, tz: Tz) -> Self {
        self.config.time_zone = tz;
        self
    }

    pub fn stamp_style(mut self, style: StampStyle) -> Self {
        self.config.stamp_style = style;
        self
    }

    pub fn placement(mut self, placement: PlacementOptions) -> Self {
        self.config.placement = placement;
        self
    }

    pub fn position(mut self, position: StampPosition) -> Self {
        self.config.placement.position = position;
        self
    }

    pub fn margin(mut self, points: f32) -> Self {
        self.config.placement.margin = points;
        self
    }

    pub fn opacity(mut self, opacity: f32) -> Self {
        self.config.placement.opacity = opacity;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.config.placement.scale = scale;
        self
    }

    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.storage_prefix = prefix.into();
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        c.placement.validate().map_err(PipelineError::InvalidConfig)?;
        if c.storage_prefix.trim_matches('/').is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Storage prefix must not be empty".into(),
            ));
        }
        if c.fetch_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Fetch concurrency must be ≥ 1".into(),
            ));
        }
        if c.stamp_style.width == 0 || c.stamp_style.height == 0 {
            return Err(PipelineError::InvalidConfig(
                "Stamp width and height must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}
