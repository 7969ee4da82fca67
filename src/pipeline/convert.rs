//! Format conversion: any supported attachment to PDF.
//!
//! Dispatch is a closed set of [`InputKind`]s decided once from the MIME
//! type. [`is_convertible_to_pdf`] is defined in terms of the same
//! classification, so the pre-filter and the converter cannot disagree.
//!
//! | MIME          | Result                                                |
//! |---------------|-------------------------------------------------------|
//! | `application/pdf` | bytes returned unchanged, pages counted          |
//! | `image/*`     | one page, image scaled down to fit A4 if larger       |
//! | `text/*`      | A4 pages: filename title, then word-wrapped body      |
//! | anything else | [`StageError::UnsupportedType`]                       |

use crate::error::StageError;
use crate::output::PdfOutput;
use crate::pipeline::pdf::{self, DocumentBuilder, PdfImage, A4_HEIGHT, A4_WIDTH};
use lopdf::content::Operation;
use lopdf::dictionary;
use tracing::debug;

// Text layout, in points.
const MARGIN: f32 = 50.0;
const BODY_SIZE: f32 = 11.0;
const TITLE_SIZE: f32 = 14.0;
const LINE_HEIGHT: f32 = 14.0;
/// Average Helvetica advance as a fraction of the font size.
const AVG_CHAR_WIDTH: f32 = 0.5;

/// Raster formats the converter distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    /// GIF, BMP, WebP, TIFF, ...: decoded and re-embedded.
    Other,
}

/// Input categories, decided from the MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image(ImageKind),
    Text,
    Unsupported,
}

impl InputKind {
    /// Classify a MIME type. Case and parameters (`; charset=...`) are ignored.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.split_once('/') {
            Some(("application", "pdf")) => InputKind::Pdf,
            Some(("image", "jpeg" | "jpg" | "pjpeg")) => InputKind::Image(ImageKind::Jpeg),
            Some(("image", "png")) => InputKind::Image(ImageKind::Png),
            Some(("image", sub)) if !sub.is_empty() => InputKind::Image(ImageKind::Other),
            Some(("text", sub)) if !sub.is_empty() => InputKind::Text,
            _ => InputKind::Unsupported,
        }
    }
}

/// Whether [`convert_to_pdf`] accepts this MIME type.
pub fn is_convertible_to_pdf(mime: &str) -> bool {
    InputKind::from_mime(mime) != InputKind::Unsupported
}

/// Convert an attachment to PDF.
///
/// Never panics on bad input: empty, corrupt and unsupported inputs all come
/// back as a [`StageError`].
pub fn convert_to_pdf(bytes: &[u8], mime: &str, name: &str) -> Result<PdfOutput, StageError> {
    let kind = InputKind::from_mime(mime);
    let output = match kind {
        InputKind::Unsupported => {
            return Err(StageError::UnsupportedType {
                name: name.to_string(),
                mime: mime.to_string(),
            })
        }
        _ if bytes.is_empty() => {
            return Err(StageError::EmptyInput {
                name: name.to_string(),
            })
        }
        InputKind::Pdf => passthrough_pdf(bytes, name)?,
        InputKind::Image(_) => image_to_pdf(bytes, name)?,
        InputKind::Text => text_to_pdf(&String::from_utf8_lossy(bytes), name)?,
    };
    debug!(
        "Converted '{}' ({:?}) to {} page(s)",
        name, kind, output.page_count
    );
    Ok(output)
}

fn passthrough_pdf(bytes: &[u8], name: &str) -> Result<PdfOutput, StageError> {
    let doc = pdf::load(bytes, name)?;
    Ok(PdfOutput {
        pdf: bytes.to_vec(),
        page_count: doc.get_pages().len() as u32,
    })
}

/// Scale `(w, h)` down to fit `(max_w, max_h)`, never up.
pub fn fit_within(w: f32, h: f32, max_w: f32, max_h: f32) -> (f32, f32) {
    if w <= max_w && h <= max_h {
        return (w, h);
    }
    let scale = (max_w / w).min(max_h / h);
    (w * scale, h * scale)
}

fn image_to_pdf(bytes: &[u8], name: &str) -> Result<PdfOutput, StageError> {
    let image = PdfImage::from_encoded(bytes).map_err(|e| StageError::conversion(name, e))?;
    let (w, h) = fit_within(image.width as f32, image.height as f32, A4_WIDTH, A4_HEIGHT);

    let mut builder = DocumentBuilder::new();
    let image_id = image.embed(builder.doc_mut());
    let resources = dictionary! { "XObject" => dictionary! { "Im1" => image_id } };
    let operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()],
        ),
        Operation::new("Do", vec!["Im1".into()]),
        Operation::new("Q", vec![]),
    ];
    builder
        .add_page(w, h, resources, operations)
        .map_err(|e| StageError::conversion(name, e))?;
    Ok(PdfOutput {
        pdf: builder.finish()?,
        page_count: 1,
    })
}

/// Greedy word wrap to at most `max_chars` per line.
///
/// Blank input lines are kept; words longer than a line are split.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let needed = if current_len == 0 {
                word.len()
            } else {
                current_len + 1 + word.len()
            };
            if needed > max_chars {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current_len += word.len();
            current.extend(word);
        }
        lines.push(current);
    }
    lines
}

fn max_chars(font_size: f32) -> usize {
    ((A4_WIDTH - 2.0 * MARGIN) / (font_size * AVG_CHAR_WIDTH)).floor() as usize
}

fn text_line(font: &str, size: f32, y: f32, text: &str) -> [Operation; 4] {
    [
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![font.into(), size.into()]),
        Operation::new("Td", vec![MARGIN.into(), y.into()]),
        Operation::new("Tj", vec![pdf::text_operand(text)]),
    ]
}

fn text_to_pdf(text: &str, name: &str) -> Result<PdfOutput, StageError> {
    let text = text.trim_start_matches('\u{FEFF}');
    let mut builder = DocumentBuilder::new();
    let regular = pdf::add_standard_font(builder.doc_mut(), "Helvetica");
    let bold = pdf::add_standard_font(builder.doc_mut(), "Helvetica-Bold");
    let resources = dictionary! { "Font" => dictionary! { "F1" => regular, "F2" => bold } };

    let top = A4_HEIGHT - MARGIN;
    let mut operations = Vec::new();
    let mut y = top - TITLE_SIZE;
    for line in wrap_text(name, max_chars(TITLE_SIZE)) {
        operations.extend(text_line("F2", TITLE_SIZE, y, &line));
        operations.push(Operation::new("ET", vec![]));
        y -= TITLE_SIZE + 4.0;
    }
    y -= LINE_HEIGHT;

    for line in wrap_text(text, max_chars(BODY_SIZE)) {
        if y < MARGIN {
            builder
                .add_page(A4_WIDTH, A4_HEIGHT, resources.clone(), std::mem::take(&mut operations))
                .map_err(|e| StageError::conversion(name, e))?;
            y = top - BODY_SIZE;
        }
        if !line.is_empty() {
            operations.extend(text_line("F1", BODY_SIZE, y, &line));
            operations.push(Operation::new("ET", vec![]));
        }
        y -= LINE_HEIGHT;
    }
    builder
        .add_page(A4_WIDTH, A4_HEIGHT, resources, operations)
        .map_err(|e| StageError::conversion(name, e))?;

    let page_count = builder.page_count() as u32;
    Ok(PdfOutput {
        pdf: builder.finish()?,
        page_count,
    })
}
