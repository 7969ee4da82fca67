//! Registration stamp rendering.
//!
//! A stamp is a fixed-size raster image:
//!
//! ```text
//! ╔════════════════════════════════════╗
//! ║ ┌────────────────────────────────┐ ║
//! ║ │ PRIMĂRIA ORAȘULUI      ┌──────┐│ ║
//! ║ │ ────────────────────   │  QR  ││ ║
//! ║ │ REG-2025-000042        │      ││ ║
//! ║ │ Data: 15/03/2025       └──────┘│ ║
//! ║ │ Ora: 14:30                     │ ║
//! ║ │ Direcția Urbanism              │ ║
//! ║ └────────────────────────────────┘ ║
//! ╚════════════════════════════════════╝
//! ```
//!
//! Text lines that share rows with the QR code are narrowed so they never
//! overlap it. QR encoding failure degrades the stamp to text only.

use crate::error::StageError;
use crate::fonts;
use ab_glyph::{FontRef, PxScale};
use base64::Engine;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use qrcode::QrCode;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

/// Organization shown when the stamp config does not name one.
pub const DEFAULT_ORGANIZATION: &str = "Primăria";

const MIN_FONT_SIZE: f32 = 7.0;
const QR_GAP: i32 = 4;

/// What goes on a stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct StampConfig {
    pub registration_number: String,
    pub received_at: DateTime<Utc>,
    pub organization_name: Option<String>,
    pub department: Option<String>,
    /// When set, a QR code encoding this URL is drawn.
    pub tracking_url: Option<String>,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
}

impl StampConfig {
    pub fn new(registration_number: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            registration_number: registration_number.into(),
            received_at,
            organization_name: None,
            department: None,
            tracking_url: None,
            sender_name: None,
            sender_email: None,
        }
    }

    pub fn organization(mut self, name: impl Into<String>) -> Self {
        self.organization_name = Some(name.into());
        self
    }

    pub fn department(mut self, name: impl Into<String>) -> Self {
        self.department = Some(name.into());
        self
    }

    pub fn tracking_url(mut self, url: impl Into<String>) -> Self {
        self.tracking_url = Some(url.into());
        self
    }

    pub fn sender(mut self, name: Option<String>, email: Option<String>) -> Self {
        self.sender_name = name;
        self.sender_email = email;
        self
    }

    fn sender_line(&self) -> Option<String> {
        match (self.sender_name.as_deref(), self.sender_email.as_deref()) {
            (Some(n), Some(e)) => Some(format!("De la: {n} <{e}>")),
            (Some(n), None) => Some(format!("De la: {n}")),
            (None, Some(e)) => Some(format!("De la: {e}")),
            (None, None) => None,
        }
    }
}

/// Visual parameters of the stamp. Sizes are in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct StampStyle {
    /// Default: 250.
    pub width: u32,
    /// Default: 150.
    pub height: u32,
    pub background: Rgba<u8>,
    pub border_color: Rgba<u8>,
    pub text_color: Rgba<u8>,
    pub number_color: Rgba<u8>,
    /// Thickness of the outer border. Default: 2.
    pub outer_border_width: u32,
    /// Distance of the 1px inner border from the edge. Default: 5.
    pub inner_border_inset: u32,
    /// Space between the inner border and the content. Default: 10.
    pub padding: u32,
    /// Side of the QR square. Default: 64.
    pub qr_size: u32,
    pub organization_font_size: f32,
    pub number_font_size: f32,
    pub text_font_size: f32,
    pub small_font_size: f32,
}

impl Default for StampStyle {
    fn default() -> Self {
        Self {
            width: 250,
            height: 150,
            background: Rgba([255, 255, 255, 255]),
            border_color: Rgba([0, 51, 153, 255]),
            text_color: Rgba([20, 20, 20, 255]),
            number_color: Rgba([153, 0, 0, 255]),
            outer_border_width: 2,
            inner_border_inset: 5,
            padding: 10,
            qr_size: 64,
            organization_font_size: 13.0,
            number_font_size: 17.0,
            text_font_size: 12.0,
            small_font_size: 10.0,
        }
    }
}

impl StampStyle {
    /// A smaller stamp for small pages.
    pub fn compact() -> Self {
        Self {
            width: 200,
            height: 120,
            padding: 8,
            qr_size: 48,
            organization_font_size: 11.0,
            number_font_size: 14.0,
            text_font_size: 10.0,
            small_font_size: 8.0,
            ..Self::default()
        }
    }

    fn content_left(&self) -> i32 {
        (self.inner_border_inset + self.padding) as i32
    }

    fn content_right(&self) -> i32 {
        self.width as i32 - self.content_left()
    }

    fn content_top(&self) -> i32 {
        (self.inner_border_inset + self.padding / 2) as i32
    }

    fn content_bottom(&self) -> i32 {
        self.height as i32 - (self.inner_border_inset + self.padding / 2) as i32
    }
}

/// Encodes text as a QR raster.
pub trait QrEncoder: Send + Sync {
    /// Render `data` into an image no larger than `size`×`size`.
    fn encode(&self, data: &str, size: u32) -> Result<RgbaImage, String>;
}

/// [`QrEncoder`] backed by the `qrcode` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrCodeEncoder;

impl QrEncoder for QrCodeEncoder {
    fn encode(&self, data: &str, size: u32) -> Result<RgbaImage, String> {
        let code = QrCode::new(data.as_bytes()).map_err(|e| e.to_string())?;
        let modules = code.width() as u32;
        if modules > size {
            return Err(format!(
                "QR code needs {modules} modules but only {size}px are available"
            ));
        }
        let module = size / modules;
        Ok(code
            .render::<Rgba<u8>>()
            .quiet_zone(false)
            .module_dimensions(module, module)
            .build())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    Regular,
    Bold,
}

/// One positioned line of stamp text.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub weight: Weight,
    pub size: f32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    color: Rgba<u8>,
}

/// Where everything on a stamp goes.
#[derive(Debug, Clone, PartialEq)]
pub struct StampLayout {
    pub width: u32,
    pub height: u32,
    /// `(x, y, side)` of the QR square, if one is drawn.
    pub qr: Option<(i32, i32, u32)>,
    /// y of the rule under the organization name.
    pub separator_y: i32,
    pub lines: Vec<PlacedLine>,
}

impl StampLayout {
    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }
}

/// Renders [`StampConfig`]s into stamp images.
#[derive(Clone)]
pub struct StampRenderer {
    style: StampStyle,
    qr: Arc<dyn QrEncoder>,
    time_zone: Tz,
}

impl fmt::Debug for StampRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampRenderer")
            .field("style", &self.style)
            .field("qr", &"<dyn QrEncoder>")
            .field("time_zone", &self.time_zone)
            .finish()
    }
}

impl Default for StampRenderer {
    fn default() -> Self {
        Self::new(StampStyle::default())
    }
}

impl StampRenderer {
    pub fn new(style: StampStyle) -> Self {
        Self {
            style,
            qr: Arc::new(QrCodeEncoder),
            time_zone: chrono_tz::Europe::Bucharest,
        }
    }

    pub fn with_qr_encoder(mut self, encoder: Arc<dyn QrEncoder>) -> Self {
        self.qr = encoder;
        self
    }

    /// Zone used to print the received date and time. Default: Europe/Bucharest.
    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.time_zone = tz;
        self
    }

    pub fn style(&self) -> &StampStyle {
        &self.style
    }

    /// Render the stamp as PNG bytes.
    pub fn render(&self, config: &StampConfig) -> Result<Vec<u8>, StageError> {
        let image = self.render_image(config)?;
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| StageError::RenderFailed(format!("PNG encoding failed: {e}")))?;
        Ok(buf)
    }

    /// Render the stamp as a `data:image/png;base64,...` URL.
    pub fn render_data_url(&self, config: &StampConfig) -> Result<String, StageError> {
        let png = self.render(config)?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }

    /// Render the stamp into an RGBA buffer.
    pub fn render_image(&self, config: &StampConfig) -> Result<RgbaImage, StageError> {
        let qr_image = config.tracking_url.as_deref().and_then(|url| {
            match self.qr.encode(url, self.style.qr_size) {
                Ok(img) if img.width() <= self.style.qr_size && img.height() <= self.style.qr_size => {
                    Some(img)
                }
                Ok(img) => {
                    warn!(
                        "QR code {}x{} exceeds {}px; rendering stamp without it",
                        img.width(),
                        img.height(),
                        self.style.qr_size
                    );
                    None
                }
                Err(e) => {
                    warn!("QR code generation failed, rendering stamp without it: {}", e);
                    None
                }
            }
        });

        let layout = self.layout(config, qr_image.is_some())?;
        let s = &self.style;
        let mut canvas = RgbaImage::from_pixel(s.width, s.height, s.background);

        for i in 0..s.outer_border_width.min(s.width / 2).min(s.height / 2) {
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(i as i32, i as i32).of_size(s.width - 2 * i, s.height - 2 * i),
                s.border_color,
            );
        }
        let inset = s.inner_border_inset;
        if 2 * inset < s.width && 2 * inset < s.height {
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(inset as i32, inset as i32).of_size(s.width - 2 * inset, s.height - 2 * inset),
                s.border_color,
            );
        }

        let rule_right = self.max_right(layout.separator_y, 1, layout.qr);
        draw_line_segment_mut(
            &mut canvas,
            (s.content_left() as f32, layout.separator_y as f32),
            (rule_right as f32, layout.separator_y as f32),
            s.border_color,
        );

        for line in &layout.lines {
            let font = font_for(line.weight)?;
            draw_text_mut(
                &mut canvas,
                line.color,
                line.x,
                line.y,
                PxScale::from(line.size),
                font,
                &line.text,
            );
        }

        if let (Some(img), Some((x, y, side))) = (qr_image, layout.qr) {
            // Centred in its square; overlay clips anything off the canvas.
            let ox = i64::from(x) + (i64::from(side) - i64::from(img.width())) / 2;
            let oy = i64::from(y) + (i64::from(side) - i64::from(img.height())) / 2;
            imageops::overlay(&mut canvas, &img, ox, oy);
        }

        debug!(
            "Rendered stamp {} ({}x{}, qr: {})",
            config.registration_number,
            s.width,
            s.height,
            layout.qr.is_some()
        );
        Ok(canvas)
    }

    /// Compute the stamp layout without drawing.
    pub fn layout(&self, config: &StampConfig, with_qr: bool) -> Result<StampLayout, StageError> {
        let s = &self.style;
        let bottom = s.content_bottom();
        let qr = with_qr.then(|| (s.content_right() - s.qr_size as i32, s.content_top(), s.qr_size));

        let local = config.received_at.with_timezone(&self.time_zone);
        let organization = config
            .organization_name
            .as_deref()
            .filter(|o| !o.trim().is_empty())
            .unwrap_or(DEFAULT_ORGANIZATION);

        let mut lines = Vec::new();
        let mut y = s.content_top();

        let org = self.place(organization, Weight::Bold, s.organization_font_size, s.text_color, y, qr)?;
        y += org.height as i32 + 3;
        lines.push(org);
        let separator_y = y;
        y += 4;

        let number = self.place(
            &config.registration_number,
            Weight::Bold,
            s.number_font_size,
            s.number_color,
            y,
            qr,
        )?;
        y += number.height as i32 + 4;
        lines.push(number);

        for text in [
            format!("Data: {}", local.format("%d/%m/%Y")),
            format!("Ora: {}", local.format("%H:%M")),
        ] {
            let line = self.place(&text, Weight::Regular, s.text_font_size, s.text_color, y, qr)?;
            y += line.height as i32 + 2;
            lines.push(line);
        }

        if let Some(dept) = config.department.as_deref().filter(|d| !d.trim().is_empty()) {
            for text in self.wrap(dept, s.text_font_size, y, qr)? {
                let line = self.place(&text, Weight::Regular, s.text_font_size, s.text_color, y, qr)?;
                if y + line.height as i32 > bottom {
                    break;
                }
                y += line.height as i32 + 2;
                lines.push(line);
            }
        }

        if let Some(sender) = config.sender_line() {
            let line = self.place(&sender, Weight::Regular, s.small_font_size, s.text_color, y, qr)?;
            if y + line.height as i32 <= bottom {
                lines.push(line);
            }
        }

        Ok(StampLayout {
            width: s.width,
            height: s.height,
            qr,
            separator_y,
            lines,
        })
    }

    /// Rightmost x available to a row spanning `y..y+h`.
    fn max_right(&self, y: i32, h: u32, qr: Option<(i32, i32, u32)>) -> i32 {
        match qr {
            Some((qx, qy, side)) if y < qy + side as i32 && y + h as i32 > qy => qx - QR_GAP,
            _ => self.style.content_right(),
        }
    }

    /// Position one line, shrinking and then truncating it to fit.
    fn place(
        &self,
        text: &str,
        weight: Weight,
        size: f32,
        color: Rgba<u8>,
        y: i32,
        qr: Option<(i32, i32, u32)>,
    ) -> Result<PlacedLine, StageError> {
        let font = font_for(weight)?;
        let left = self.style.content_left();
        let line_height = (size * 1.2).ceil() as u32;
        let max_width = (self.max_right(y, line_height, qr) - left).max(0) as u32;

        let mut size = size;
        let mut text = text.to_string();
        let mut width = text_size(PxScale::from(size), font, &text).0;
        while width > max_width && size > MIN_FONT_SIZE {
            size = (size - 0.5).max(MIN_FONT_SIZE);
            width = text_size(PxScale::from(size), font, &text).0;
        }
        if width > max_width {
            let mut chars: Vec<char> = text.chars().collect();
            while width > max_width && !chars.is_empty() {
                chars.pop();
                text = chars.iter().collect::<String>() + "…";
                width = text_size(PxScale::from(size), font, &text).0;
            }
        }

        Ok(PlacedLine {
            text,
            weight,
            size,
            x: left,
            y,
            width,
            height: (size * 1.2).ceil() as u32,
            color,
        })
    }

    /// Word-wrap by measured width, starting at row `y`.
    fn wrap(&self, text: &str, size: f32, y: i32, qr: Option<(i32, i32, u32)>) -> Result<Vec<String>, StageError> {
        let font = fonts::regular()?;
        let left = self.style.content_left();
        let line_height = (size * 1.2).ceil() as i32;
        let mut lines = Vec::new();
        let mut current = String::new();
        let mut row_y = y;
        for word in text.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            let max_width = (self.max_right(row_y, line_height as u32, qr) - left).max(0) as u32;
            if !current.is_empty() && text_size(PxScale::from(size), font, &candidate).0 > max_width {
                lines.push(std::mem::replace(&mut current, word.to_string()));
                row_y += line_height + 2;
            } else {
                current = candidate;
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        Ok(lines)
    }
}

fn font_for(weight: Weight) -> Result<&'static FontRef<'static>, StageError> {
    match weight {
        Weight::Regular => fonts::regular(),
        Weight::Bold => fonts::bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FailingEncoder;

    impl QrEncoder for FailingEncoder {
        fn encode(&self, _data: &str, _size: u32) -> Result<RgbaImage, String> {
            Err("encoder exploded".into())
        }
    }

    fn config() -> StampConfig {
        StampConfig::new(
            "REG-2025-000042",
            Utc.with_ymd_and_hms(2025, 3, 15, 12, 30, 0).unwrap(),
        )
        .organization("Primăria Municipiului Brașov")
        .department("Direcția Urbanism și Amenajarea Teritoriului")
    }

    fn rects_overlap(line: &PlacedLine, (qx, qy, side): (i32, i32, u32)) -> bool {
        let lx1 = line.x + line.width as i32;
        let ly1 = line.y + line.height as i32;
        line.x < qx + side as i32 && lx1 > qx && line.y < qy + side as i32 && ly1 > qy
    }

    #[test]
    fn dates_are_local_romanian_format() {
        let layout = StampRenderer::default().layout(&config(), false).unwrap();
        let texts = layout.texts();
        assert!(texts.contains(&"Data: 15/03/2025"), "{texts:?}");
        assert!(texts.contains(&"Ora: 14:30"), "{texts:?}");
    }

    #[test]
    fn summer_time_crosses_midnight() {
        let cfg = StampConfig::new("X-2025-1", Utc.with_ymd_and_hms(2025, 6, 30, 22, 30, 0).unwrap());
        let layout = StampRenderer::default().layout(&cfg, false).unwrap();
        let texts = layout.texts();
        assert!(texts.contains(&"Data: 01/07/2025"), "{texts:?}");
        assert!(texts.contains(&"Ora: 01:30"), "{texts:?}");
    }

    #[test]
    fn organization_defaults_when_missing() {
        let cfg = StampConfig::new("REG-2025-000001", Utc::now());
        let layout = StampRenderer::default().layout(&cfg, false).unwrap();
        assert_eq!(layout.lines[0].text, DEFAULT_ORGANIZATION);
    }

    #[test]
    fn text_never_overlaps_qr_region() {
        let cfg = config().tracking_url("https://registratura.example.ro/track/REG-2025-000042");
        for style in [StampStyle::default(), StampStyle::compact()] {
            let layout = StampRenderer::new(style).layout(&cfg, true).unwrap();
            let qr = layout.qr.unwrap();
            for line in &layout.lines {
                assert!(!rects_overlap(line, qr), "{line:?} overlaps {qr:?}");
                assert!(line.x + line.width as i32 <= layout.width as i32);
            }
        }
    }

    #[test]
    fn rendered_stamp_has_dark_qr_modules() {
        let cfg = config().tracking_url("https://registratura.example.ro/track/REG-2025-000042");
        let renderer = StampRenderer::default();
        let img = renderer.render_image(&cfg).unwrap();
        let (qx, qy, side) = renderer.layout(&cfg, true).unwrap().qr.unwrap();
        let dark = (qx..qx + side as i32)
            .flat_map(|x| (qy..qy + side as i32).map(move |y| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x as u32, y as u32).0[0] < 64)
            .count();
        assert!(dark > 100, "only {dark} dark pixels in QR region");
    }

    #[test]
    fn qr_larger_than_a_tiny_stamp_is_clipped() {
        let style = StampStyle {
            width: 60,
            height: 40,
            qr_size: 80,
            ..StampStyle::default()
        };
        let cfg = config().tracking_url("https://example.ro/t/1");
        let renderer = StampRenderer::new(style);
        let (qx, _, _) = renderer.layout(&cfg, true).unwrap().qr.unwrap();
        assert!(qx < 0, "QR square starts left of the canvas: {qx}");

        let img = renderer.render_image(&cfg).unwrap();
        assert_eq!((img.width(), img.height()), (60, 40));
    }

    #[test]
    fn qr_failure_degrades_to_text_only() {
        let cfg = config().tracking_url("https://example.ro/t/1");
        let renderer = StampRenderer::default().with_qr_encoder(Arc::new(FailingEncoder));
        let png = renderer.render(&cfg).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (250, 150));

        let layout = renderer.layout(&cfg, false).unwrap();
        let joined = layout.texts().join("\n");
        assert!(joined.contains("REG-2025-000042"));
        assert!(joined.contains("Primăria"));
        assert!(joined.contains("Data: 15/03/2025"));
        assert!(joined.contains("Direcția"));
    }

    #[test]
    fn qr_encoder_fits_requested_size() {
        let img = QrCodeEncoder
            .encode("https://registratura.example.ro/track/REG-2025-000042", 64)
            .unwrap();
        assert!(img.width() <= 64 && img.height() <= 64);
        assert!(QrCodeEncoder.encode(&"x".repeat(2000), 64).is_err());
    }

    #[test]
    fn long_text_is_truncated_within_bounds() {
        let cfg = StampConfig::new("REG-2025-000042", Utc::now())
            .organization("Primăria Municipiului cu un nume extraordinar de lung pentru o ștampilă");
        let layout = StampRenderer::default().layout(&cfg, false).unwrap();
        let org = &layout.lines[0];
        assert!(org.text.ends_with('…'), "{}", org.text);
        assert!(org.x + org.width as i32 <= 250 - 15);
    }

    #[test]
    fn data_url_prefix() {
        let url = StampRenderer::default().render_data_url(&config()).unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBOR"));
    }
}
