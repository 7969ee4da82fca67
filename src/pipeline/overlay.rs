//! Drawing stamps and text watermarks onto existing PDF pages.

use super::pdf::{self, PageBox, PdfImage};
use super::stamp::{StampConfig, StampRenderer};
use crate::error::StageError;
use crate::output::PdfOutput;
use image::DynamicImage;
use lopdf::content::Operation;
use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Page corner a stamp is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StampPosition {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
}

impl StampPosition {
    pub const ALL: [StampPosition; 4] = [
        StampPosition::TopLeft,
        StampPosition::TopRight,
        StampPosition::BottomLeft,
        StampPosition::BottomRight,
    ];
}

impl fmt::Display for StampPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StampPosition::TopLeft => "top-left",
            StampPosition::TopRight => "top-right",
            StampPosition::BottomLeft => "bottom-left",
            StampPosition::BottomRight => "bottom-right",
        })
    }
}

impl FromStr for StampPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" => Ok(StampPosition::TopLeft),
            "top-right" => Ok(StampPosition::TopRight),
            "bottom-left" => Ok(StampPosition::BottomLeft),
            "bottom-right" => Ok(StampPosition::BottomRight),
            other => Err(format!(
                "unknown position '{other}' (expected top-left, top-right, bottom-left or bottom-right)"
            )),
        }
    }
}

/// Where and how a stamp or watermark is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementOptions {
    /// Default: [`StampPosition::TopRight`].
    pub position: StampPosition,
    /// Distance from the page edge in points. Default: 20.
    pub margin: f32,
    /// 0.0 (invisible) to 1.0 (opaque). Default: 1.0.
    pub opacity: f32,
    /// Stamp every page instead of only the first. Default: false.
    pub all_pages: bool,
    /// Points per stamp pixel. Default: 1.0.
    pub scale: f32,
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            position: StampPosition::TopRight,
            margin: 20.0,
            opacity: 1.0,
            all_pages: false,
            scale: 1.0,
        }
    }
}

impl PlacementOptions {
    /// Reject opacity outside 0.0–1.0, non-positive scale and negative
    /// margins. NaN fails every check.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(format!("opacity must be within 0.0–1.0, got {}", self.opacity));
        }
        if !(self.scale > 0.0 && self.scale.is_finite()) {
            return Err(format!("stamp scale must be > 0, got {}", self.scale));
        }
        if !(self.margin >= 0.0 && self.margin.is_finite()) {
            return Err(format!("margin must be ≥ 0, got {}", self.margin));
        }
        Ok(())
    }
}

/// Placement of a drawn object, in page user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Placement {
    /// True if this rectangle lies within `page`.
    pub fn is_within(&self, page: &PageBox) -> bool {
        const EPS: f32 = 1e-3;
        self.x >= page.x0 - EPS
            && self.y >= page.y0 - EPS
            && self.x + self.width <= page.x1 + EPS
            && self.y + self.height <= page.y1 + EPS
    }
}

/// Compute where a `width`×`height` object goes on `page`.
///
/// Objects larger than the page minus margins are scaled down uniformly.
/// The margin itself is capped at a quarter of the page's shorter side so
/// tiny pages still have room.
pub fn stamp_rect(page: PageBox, width: f32, height: f32, opts: &PlacementOptions) -> Placement {
    let margin = opts
        .margin
        .max(0.0)
        .min(page.width() / 4.0)
        .min(page.height() / 4.0);
    let avail_w = page.width() - 2.0 * margin;
    let avail_h = page.height() - 2.0 * margin;

    let (mut w, mut h) = (width.max(0.0), height.max(0.0));
    if w > avail_w || h > avail_h {
        let factor = (avail_w / w).min(avail_h / h);
        w *= factor;
        h *= factor;
    }

    let left = page.x0 + margin;
    let right = page.x1 - margin - w;
    let bottom = page.y0 + margin;
    let top = page.y1 - margin - h;
    let (x, y) = match opts.position {
        StampPosition::TopLeft => (left, top),
        StampPosition::TopRight => (right, top),
        StampPosition::BottomLeft => (left, bottom),
        StampPosition::BottomRight => (right, bottom),
    };
    Placement {
        x,
        y,
        width: w,
        height: h,
    }
}

fn target_pages(doc: &Document, all_pages: bool) -> Vec<ObjectId> {
    let pages = doc.get_pages();
    if all_pages {
        pages.into_values().collect()
    } else {
        pages.into_values().take(1).collect()
    }
}

fn stamp_error(e: lopdf::Error) -> StageError {
    StageError::StampFailed(e.to_string())
}

/// Overlays registration stamps on PDFs.
#[derive(Debug, Clone, Default)]
pub struct PdfStamper {
    renderer: StampRenderer,
}

impl PdfStamper {
    pub fn new(renderer: StampRenderer) -> Self {
        Self { renderer }
    }

    pub fn renderer(&self) -> &StampRenderer {
        &self.renderer
    }

    /// Render the stamp for `config` and draw it on the first (or every)
    /// page of `pdf`.
    ///
    /// On error nothing is returned; the input bytes are never modified.
    pub fn stamp(
        &self,
        pdf_bytes: &[u8],
        config: &StampConfig,
        opts: &PlacementOptions,
    ) -> Result<PdfOutput, StageError> {
        opts.validate().map_err(StageError::StampFailed)?;
        let mut doc = pdf::load(pdf_bytes, "document")?;
        let pages = target_pages(&doc, opts.all_pages);
        if pages.is_empty() {
            return Err(StageError::StampFailed("document has no pages".into()));
        }

        let image = self.renderer.render_image(config)?;
        let (px_w, px_h) = (image.width() as f32, image.height() as f32);
        let image_id = PdfImage::from_dynamic(&DynamicImage::ImageRgba8(image)).embed(&mut doc);
        let gs_id = (opts.opacity < 1.0).then(|| pdf::add_opacity_state(&mut doc, opts.opacity));

        for &page_id in &pages {
            let placement = stamp_rect(
                pdf::page_box(&doc, page_id),
                px_w * opts.scale,
                px_h * opts.scale,
                opts,
            );
            let mut ops = Vec::with_capacity(3);
            if let Some(gs_id) = gs_id {
                let gs = pdf::add_resource(&mut doc, page_id, "ExtGState", "GS", gs_id).map_err(stamp_error)?;
                ops.push(Operation::new("gs", vec![Object::Name(gs.into_bytes())]));
            }
            let name = pdf::add_resource(&mut doc, page_id, "XObject", "Stamp", image_id).map_err(stamp_error)?;
            ops.push(Operation::new(
                "cm",
                vec![
                    placement.width.into(),
                    0.into(),
                    0.into(),
                    placement.height.into(),
                    placement.x.into(),
                    placement.y.into(),
                ],
            ));
            ops.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
            pdf::append_overlay(&mut doc, page_id, ops).map_err(stamp_error)?;
            debug!("Stamp placed on page {:?} at {:?}", page_id, placement);
        }

        let page_count = doc.get_pages().len() as u32;
        let out = pdf::save(&mut doc)?;
        info!(
            "Stamped {} on {} of {} pages",
            config.registration_number,
            pages.len(),
            page_count
        );
        Ok(PdfOutput {
            pdf: out,
            page_count,
        })
    }

    /// Draw `text` in Helvetica at the configured corner, without an image.
    pub fn watermark(
        &self,
        pdf_bytes: &[u8],
        text: &str,
        font_size: f32,
        opts: &PlacementOptions,
    ) -> Result<PdfOutput, StageError> {
        if text.trim().is_empty() {
            return Err(StageError::StampFailed("watermark text is empty".into()));
        }
        if !(font_size > 0.0 && font_size.is_finite()) {
            return Err(StageError::StampFailed(format!("font size must be > 0, got {font_size}")));
        }
        opts.validate().map_err(StageError::StampFailed)?;
        let mut doc = pdf::load(pdf_bytes, "document")?;
        let pages = target_pages(&doc, opts.all_pages);
        if pages.is_empty() {
            return Err(StageError::StampFailed("document has no pages".into()));
        }

        let font_id = pdf::add_standard_font(&mut doc, "Helvetica");
        let gs_id = (opts.opacity < 1.0).then(|| pdf::add_opacity_state(&mut doc, opts.opacity));
        let size = font_size * opts.scale;
        // Helvetica averages a little over half an em per glyph.
        let est_width = text.chars().count() as f32 * size * 0.55;

        for &page_id in &pages {
            let placement = stamp_rect(pdf::page_box(&doc, page_id), est_width, size, opts);
            let fitted = if est_width > 0.0 {
                size * placement.width / est_width
            } else {
                size
            };
            let mut ops = Vec::with_capacity(7);
            if let Some(gs_id) = gs_id {
                let gs = pdf::add_resource(&mut doc, page_id, "ExtGState", "GS", gs_id).map_err(stamp_error)?;
                ops.push(Operation::new("gs", vec![Object::Name(gs.into_bytes())]));
            }
            let font = pdf::add_resource(&mut doc, page_id, "Font", "WM", font_id).map_err(stamp_error)?;
            ops.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(font.into_bytes()), fitted.into()]),
                // Baseline sits a fifth of the size above the box bottom.
                Operation::new("Td", vec![placement.x.into(), (placement.y + fitted * 0.2).into()]),
                Operation::new("Tj", vec![pdf::text_operand(text)]),
                Operation::new("ET", vec![]),
            ]);
            pdf::append_overlay(&mut doc, page_id, ops).map_err(stamp_error)?;
        }

        let page_count = doc.get_pages().len() as u32;
        Ok(PdfOutput {
            pdf: pdf::save(&mut doc)?,
            page_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pdf::{rect, DocumentBuilder, A4_HEIGHT, A4_WIDTH};
    use chrono::Utc;
    use lopdf::Dictionary;

    fn blank_pdf(sizes: &[(f32, f32)]) -> Vec<u8> {
        let mut b = DocumentBuilder::new();
        for &(w, h) in sizes {
            b.add_page(w, h, Dictionary::new(), vec![]).unwrap();
        }
        b.finish().unwrap()
    }

    fn page_box(w: f32, h: f32) -> PageBox {
        PageBox {
            x0: 0.0,
            y0: 0.0,
            x1: w,
            y1: h,
        }
    }

    fn pages_with_resource(pdf: &[u8], category: &[u8], name: &[u8]) -> Vec<bool> {
        let doc = Document::load_mem(pdf).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| {
                doc.get_dictionary(id)
                    .unwrap()
                    .get(b"Resources")
                    .and_then(Object::as_dict)
                    .and_then(|r| r.get(category))
                    .and_then(Object::as_dict)
                    .map(|x| x.has(name))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn stamped_pages(pdf: &[u8]) -> Vec<bool> {
        pages_with_resource(pdf, b"XObject", b"Stamp1")
    }

    #[test]
    fn stamp_stays_within_page_for_every_corner() {
        let sizes = [
            (A4_WIDTH, A4_HEIGHT),
            (A4_HEIGHT, A4_WIDTH),
            (612.0, 792.0),
            (290.0, 190.0),
            (270.0, 170.0),
        ];
        for (w, h) in sizes {
            for position in StampPosition::ALL {
                for margin in [0.0, 20.0, 36.0] {
                    let opts = PlacementOptions {
                        position,
                        margin,
                        ..PlacementOptions::default()
                    };
                    let page = page_box(w, h);
                    let p = stamp_rect(page, 250.0, 150.0, &opts);
                    assert!(p.is_within(&page), "{position} on {w}x{h}: {p:?}");
                }
            }
        }
    }

    #[test]
    fn stamp_respects_margin_and_corner() {
        let page = page_box(A4_WIDTH, A4_HEIGHT);
        let p = stamp_rect(page, 250.0, 150.0, &PlacementOptions::default());
        assert!((p.x - (A4_WIDTH - 20.0 - 250.0)).abs() < 1e-3);
        assert!((p.y - (A4_HEIGHT - 20.0 - 150.0)).abs() < 1e-3);
        assert_eq!((p.width, p.height), (250.0, 150.0));

        let opts = PlacementOptions {
            position: StampPosition::BottomLeft,
            ..PlacementOptions::default()
        };
        let p = stamp_rect(page, 250.0, 150.0, &opts);
        assert_eq!((p.x, p.y), (20.0, 20.0));
    }

    #[test]
    fn oversized_stamp_is_scaled_down_preserving_aspect() {
        let page = page_box(200.0, 200.0);
        let p = stamp_rect(page, 250.0, 150.0, &PlacementOptions::default());
        assert!(p.is_within(&page));
        assert!(p.width < 250.0);
        assert!((p.width / p.height - 250.0 / 150.0).abs() < 1e-3);
    }

    #[test]
    fn offset_media_box_is_respected() {
        let page = PageBox {
            x0: 100.0,
            y0: 50.0,
            x1: 700.0,
            y1: 900.0,
        };
        for position in StampPosition::ALL {
            let opts = PlacementOptions {
                position,
                ..PlacementOptions::default()
            };
            assert!(stamp_rect(page, 250.0, 150.0, &opts).is_within(&page));
        }
    }

    #[test]
    fn first_page_only_by_default() {
        let pdf = blank_pdf(&[(A4_WIDTH, A4_HEIGHT); 3]);
        let config = StampConfig::new("REG-2025-000042", Utc::now());
        let out = PdfStamper::default()
            .stamp(&pdf, &config, &PlacementOptions::default())
            .unwrap();
        assert_eq!(out.page_count, 3);
        assert_eq!(stamped_pages(&out.pdf), vec![true, false, false]);
    }

    #[test]
    fn all_pages_stamps_every_page() {
        let pdf = blank_pdf(&[(A4_WIDTH, A4_HEIGHT), (612.0, 792.0)]);
        let config = StampConfig::new("REG-2025-000042", Utc::now());
        let opts = PlacementOptions {
            all_pages: true,
            opacity: 0.6,
            ..PlacementOptions::default()
        };
        let out = PdfStamper::default().stamp(&pdf, &config, &opts).unwrap();
        assert_eq!(stamped_pages(&out.pdf), vec![true, true]);
    }

    #[test]
    fn corrupt_input_fails_without_output() {
        let config = StampConfig::new("REG-2025-000042", Utc::now());
        let err = PdfStamper::default()
            .stamp(b"%PDF-1.4 garbage", &config, &PlacementOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::CorruptPdf { .. }), "{err:?}");
    }

    #[test]
    fn shared_resources_on_parent_are_not_mutated() {
        let mut doc = Document::load_mem(&blank_pdf(&[(300.0, 300.0), (300.0, 300.0)])).unwrap();
        let ids: Vec<_> = doc.get_pages().into_values().collect();
        let parent = doc
            .get_dictionary(ids[0])
            .unwrap()
            .get(b"Parent")
            .unwrap()
            .as_reference()
            .unwrap();
        for id in &ids {
            doc.get_dictionary_mut(*id).unwrap().remove(b"Resources");
        }
        doc.get_dictionary_mut(parent)
            .unwrap()
            .set("Resources", Dictionary::new());
        doc.get_dictionary_mut(parent)
            .unwrap()
            .set("MediaBox", rect(0.0, 0.0, 300.0, 300.0));
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let config = StampConfig::new("REG-2025-000001", Utc::now());
        let out = PdfStamper::default()
            .stamp(&bytes, &config, &PlacementOptions::default())
            .unwrap();
        assert_eq!(stamped_pages(&out.pdf), vec![true, false]);
    }

    #[test]
    fn out_of_range_opacity_or_scale_is_rejected() {
        let pdf = blank_pdf(&[(A4_WIDTH, A4_HEIGHT)]);
        let config = StampConfig::new("REG-2025-000042", Utc::now());
        let stamper = PdfStamper::default();
        let bad = [
            PlacementOptions { opacity: -2.0, ..PlacementOptions::default() },
            PlacementOptions { opacity: 1.5, ..PlacementOptions::default() },
            PlacementOptions { opacity: f32::NAN, ..PlacementOptions::default() },
            PlacementOptions { scale: 0.0, ..PlacementOptions::default() },
            PlacementOptions { scale: -1.0, ..PlacementOptions::default() },
            PlacementOptions { scale: f32::INFINITY, ..PlacementOptions::default() },
            PlacementOptions { scale: f32::NAN, ..PlacementOptions::default() },
            PlacementOptions { margin: -5.0, ..PlacementOptions::default() },
        ];
        for opts in bad {
            let err = stamper.stamp(&pdf, &config, &opts).unwrap_err();
            assert!(matches!(err, StageError::StampFailed(_)), "{opts:?}: {err:?}");
            let err = stamper.watermark(&pdf, "COPIE", 12.0, &opts).unwrap_err();
            assert!(matches!(err, StageError::StampFailed(_)), "{opts:?}: {err:?}");
        }
    }

    #[test]
    fn boundary_opacity_is_accepted() {
        let pdf = blank_pdf(&[(A4_WIDTH, A4_HEIGHT)]);
        let config = StampConfig::new("REG-2025-000042", Utc::now());
        for opacity in [0.0, 1.0] {
            let opts = PlacementOptions { opacity, ..PlacementOptions::default() };
            assert!(PdfStamper::default().stamp(&pdf, &config, &opts).is_ok());
        }
    }

    #[test]
    fn watermark_rejects_non_positive_font_size() {
        let pdf = blank_pdf(&[(A4_WIDTH, A4_HEIGHT)]);
        let err = PdfStamper::default()
            .watermark(&pdf, "COPIE", 0.0, &PlacementOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::StampFailed(_)), "{err:?}");
    }

    #[test]
    fn watermark_adds_font_resource() {
        let pdf = blank_pdf(&[(A4_WIDTH, A4_HEIGHT)]);
        let out = PdfStamper::default()
            .watermark(&pdf, "COPIE CONFORMĂ", 18.0, &PlacementOptions::default())
            .unwrap();
        assert_eq!(pages_with_resource(&out.pdf, b"Font", b"WM1"), vec![true]);
        assert_eq!(pages_with_resource(&out.pdf, b"XObject", b"Stamp1"), vec![false]);
    }

    #[test]
    fn position_parses_from_cli_strings() {
        assert_eq!("bottom_left".parse::<StampPosition>().unwrap(), StampPosition::BottomLeft);
        assert_eq!(StampPosition::TopRight.to_string(), "top-right");
        assert!("middle".parse::<StampPosition>().is_err());
    }
}
