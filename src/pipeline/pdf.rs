//! Low-level PDF helpers shared by the converter, stamper and merger.
//!
//! Everything here operates on an in-memory [`lopdf::Document`]. Pages may
//! inherit `Resources`, `MediaBox`, `CropBox` and `Rotate` from ancestor
//! `Pages` nodes, so helpers that read or modify those keys walk the
//! `Parent` chain instead of trusting the page dictionary alone.

use crate::error::StageError;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

/// A4 portrait, in points.
pub const A4_WIDTH: f32 = 595.28;
pub const A4_HEIGHT: f32 = 841.89;

/// Keys a page may inherit from its ancestors.
pub const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MAX_TREE_DEPTH: usize = 64;

// ── Load / save ──────────────────────────────────────────────────────────

/// Parse PDF bytes. `name` is only used in the error message.
pub fn load(bytes: &[u8], name: &str) -> Result<Document, StageError> {
    if bytes.is_empty() {
        return Err(StageError::EmptyInput {
            name: name.to_string(),
        });
    }
    Document::load_mem(bytes).map_err(|e| StageError::corrupt(name, e))
}

/// Serialise a document.
pub fn save(doc: &mut Document) -> Result<Vec<u8>, StageError> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| StageError::Internal(format!("PDF serialisation failed: {e}")))?;
    Ok(buf)
}

/// Number of pages in a PDF.
pub fn count_pages(bytes: &[u8]) -> Result<u32, StageError> {
    let doc = load(bytes, "document")?;
    Ok(doc.get_pages().len() as u32)
}

// ── Page geometry ────────────────────────────────────────────────────────

/// A page's visible rectangle in default user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PageBox {
    pub fn a4() -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            x1: A4_WIDTH,
            y1: A4_HEIGHT,
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    fn from_array(doc: &Document, obj: &Object) -> Option<Self> {
        let (_, obj) = doc.dereference(obj).ok()?;
        let arr = obj.as_array().ok()?;
        if arr.len() != 4 {
            return None;
        }
        let mut v = [0f32; 4];
        for (slot, item) in v.iter_mut().zip(arr) {
            let (_, item) = doc.dereference(item).ok()?;
            *slot = item.as_float().ok()?;
        }
        // Normalise: boxes may be given with any two opposite corners.
        Some(Self {
            x0: v[0].min(v[2]),
            y0: v[1].min(v[3]),
            x1: v[0].max(v[2]),
            y1: v[1].max(v[3]),
        })
    }
}

/// A PDF rectangle array.
pub fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<Object> {
    vec![x0.into(), y0.into(), x1.into(), y1.into()]
}

/// Look up `key` on a page or the nearest ancestor that defines it.
pub fn inherited_attr(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(v) = node.get(key) {
            return Some(v.clone());
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// The page's CropBox, falling back to MediaBox, then A4.
pub fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    inherited_attr(doc, page_id, b"CropBox")
        .and_then(|o| PageBox::from_array(doc, &o))
        .or_else(|| {
            inherited_attr(doc, page_id, b"MediaBox").and_then(|o| PageBox::from_array(doc, &o))
        })
        .unwrap_or_else(PageBox::a4)
}

/// Copy inherited attributes onto the page itself so it no longer depends
/// on its ancestors.
pub fn flatten_inherited(doc: &Document, page_id: ObjectId) -> Result<Dictionary, lopdf::Error> {
    let mut page = doc.get_dictionary(page_id)?.clone();
    for key in INHERITABLE_KEYS {
        if !page.has(key) {
            if let Some(v) = inherited_attr(doc, page_id, key) {
                page.set(key, v);
            }
        }
    }
    Ok(page)
}

// ── Resources ────────────────────────────────────────────────────────────

fn resolve_dict(doc: &Document, obj: Option<&Object>) -> Dictionary {
    match obj {
        Some(Object::Dictionary(d)) => d.clone(),
        Some(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
        _ => Dictionary::new(),
    }
}

/// Register `target` under a fresh name in the page's `category` resource
/// dictionary (`XObject`, `ExtGState`, `Font`) and return the name.
///
/// The page's resources are copied into a direct dictionary on the page so
/// that siblings sharing an inherited or indirect resource dictionary are
/// left untouched.
pub fn add_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    name_prefix: &str,
    target: ObjectId,
) -> Result<String, lopdf::Error> {
    let inherited = inherited_attr(doc, page_id, b"Resources");
    let mut resources = resolve_dict(doc, inherited.as_ref());
    let mut entries = resolve_dict(doc, resources.get(category.as_bytes()).ok());

    let name = (1..)
        .map(|n| format!("{name_prefix}{n}"))
        .find(|candidate| !entries.has(candidate.as_bytes()))
        .unwrap_or_else(|| name_prefix.to_string());
    entries.set(name.as_bytes().to_vec(), Object::Reference(target));
    resources.set(category.as_bytes().to_vec(), entries);

    doc.get_dictionary_mut(page_id)?.set("Resources", resources);
    Ok(name)
}

// ── Content ──────────────────────────────────────────────────────────────

/// Append `operations` on top of the page's existing content.
///
/// The existing content is wrapped in `q … Q` so any graphics state it
/// leaves behind (an unbalanced `cm`, a clip) cannot displace the overlay.
pub fn append_overlay(
    doc: &mut Document,
    page_id: ObjectId,
    operations: Vec<Operation>,
) -> Result<(), lopdf::Error> {
    let existing: Vec<Object> = {
        let page = doc.get_dictionary(page_id)?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(arr)) => arr.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(arr)) => arr.clone(),
            _ => vec![],
        }
    };

    let mut overlay = vec![Operation::new("Q", vec![]), Operation::new("q", vec![])];
    overlay.extend(operations);
    overlay.push(Operation::new("Q", vec![]));
    let overlay = Content {
        operations: overlay,
    }
    .encode()?;

    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q".to_vec()));
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(overlay_id));

    doc.get_dictionary_mut(page_id)?.set("Contents", contents);
    debug!("overlay appended to page {:?}", page_id);
    Ok(())
}

/// An `ExtGState` with constant fill and stroke alpha.
pub fn add_opacity_state(doc: &mut Document, opacity: f32) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => opacity,
        "CA" => opacity,
    })
}

/// Encode text for a standard Type 1 font with `WinAnsiEncoding`.
///
/// Romanian comma-below letters and breve-a have no WinAnsi code point and
/// are folded to their base letter; anything else unmappable becomes `?`.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars().map(win_ansi_byte).collect()
}

fn win_ansi_byte(c: char) -> u8 {
    match c {
        ' '..='~' => c as u8,
        '\t' => b' ',
        '\u{00A0}'..='\u{00FF}' => c as u32 as u8,
        'ș' | 'ş' => b's',
        'Ș' | 'Ş' => b'S',
        'ț' | 'ţ' => b't',
        'Ț' | 'Ţ' => b'T',
        'ă' => b'a',
        'Ă' => b'A',
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => b'?',
    }
}

/// A PDF literal string operand.
pub fn text_operand(text: &str) -> Object {
    Object::String(win_ansi(text), StringFormat::Literal)
}

/// A standard 14 font dictionary (`Helvetica`, `Helvetica-Bold`, ...).
pub fn add_standard_font(doc: &mut Document, base_font: &str) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    })
}

// ── Images ───────────────────────────────────────────────────────────────

/// Pixel data ready to be embedded as an image XObject.
#[derive(Debug, Clone)]
pub struct PdfImage {
    pub width: u32,
    pub height: u32,
    data: ImageData,
}

#[derive(Debug, Clone)]
enum ImageData {
    /// Baseline JPEG passed through untouched with `DCTDecode`.
    Jpeg { bytes: Vec<u8>, color_space: &'static str },
    /// 8-bit RGB samples plus an optional soft mask.
    Raw { rgb: Vec<u8>, alpha: Option<Vec<u8>> },
}

impl PdfImage {
    /// Decode encoded image bytes. JPEG with 1 or 3 components is kept
    /// as-is; every other format is decoded to raw samples.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        if image::guess_format(bytes).ok() == Some(image::ImageFormat::Jpeg) {
            let color_space = match jpeg_components(bytes) {
                Some(1) => Some("DeviceGray"),
                Some(3) => Some("DeviceRGB"),
                _ => None,
            };
            if let Some(color_space) = color_space {
                return Ok(Self {
                    width: img.width(),
                    height: img.height(),
                    data: ImageData::Jpeg {
                        bytes: bytes.to_vec(),
                        color_space,
                    },
                });
            }
        }
        Ok(Self::from_dynamic(&img))
    }

    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let alpha = if img.color().has_alpha() {
            let rgba = img.to_rgba8();
            let alpha: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
            // Fully opaque masks are dropped.
            alpha.iter().any(|&a| a != 255).then_some(alpha)
        } else {
            None
        };
        Self {
            width: img.width(),
            height: img.height(),
            data: ImageData::Raw {
                rgb: img.to_rgb8().into_raw(),
                alpha,
            },
        }
    }

    pub fn is_passthrough_jpeg(&self) -> bool {
        matches!(self.data, ImageData::Jpeg { .. })
    }

    /// Add this image (and its soft mask) to `doc`; returns the XObject id.
    pub fn embed(&self, doc: &mut Document) -> ObjectId {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => self.width,
            "Height" => self.height,
            "BitsPerComponent" => 8,
        };
        match &self.data {
            ImageData::Jpeg { bytes, color_space } => {
                dict.set("ColorSpace", *color_space);
                dict.set("Filter", "DCTDecode");
                doc.add_object(Stream::new(dict, bytes.clone()).with_compression(false))
            }
            ImageData::Raw { rgb, alpha } => {
                dict.set("ColorSpace", "DeviceRGB");
                if let Some(alpha) = alpha {
                    let mut mask = Stream::new(
                        dictionary! {
                            "Type" => "XObject",
                            "Subtype" => "Image",
                            "Width" => self.width,
                            "Height" => self.height,
                            "ColorSpace" => "DeviceGray",
                            "BitsPerComponent" => 8,
                        },
                        alpha.clone(),
                    );
                    compress_stream(&mut mask);
                    let mask_id = doc.add_object(mask);
                    dict.set("SMask", mask_id);
                }
                let mut stream = Stream::new(dict, rgb.clone());
                compress_stream(&mut stream);
                doc.add_object(stream)
            }
        }
    }
}

fn compress_stream(stream: &mut Stream) {
    if let Err(e) = stream.compress() {
        debug!("leaving image stream uncompressed: {}", e);
    }
}

/// Component count from the first SOF marker of a JPEG.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        // SOF0..SOF15 except DHT (C4), JPG (C8) and DAC (CC).
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            return bytes.get(i + 9).copied();
        }
        if marker == 0xDA {
            return None;
        }
        i += 2 + len;
    }
    None
}

// ── New documents ────────────────────────────────────────────────────────

/// Accumulates pages for a freshly created document.
pub struct DocumentBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn doc_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Add a page of `width`×`height` points drawing `operations` with `resources`.
    pub fn add_page(
        &mut self,
        width: f32,
        height: f32,
        resources: Dictionary,
        operations: Vec<Operation>,
    ) -> Result<ObjectId, lopdf::Error> {
        let content = Content { operations }.encode()?;
        let content_id = self.doc.add_object(Stream::new(Dictionary::new(), content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => rect(0.0, 0.0, width, height),
            "Resources" => resources,
            "Contents" => content_id,
        });
        self.kids.push(page_id.into());
        Ok(page_id)
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Close the page tree and serialise.
    pub fn finish(mut self) -> Result<Vec<u8>, StageError> {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();
        save(&mut self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn blank_pdf(pages: usize, width: f32, height: f32) -> Vec<u8> {
        let mut b = DocumentBuilder::new();
        for _ in 0..pages {
            b.add_page(width, height, Dictionary::new(), vec![]).unwrap();
        }
        b.finish().unwrap()
    }

    #[test]
    fn builder_output_parses_with_page_count() {
        let pdf = blank_pdf(3, A4_WIDTH, A4_HEIGHT);
        assert!(pdf.starts_with(b"%PDF-1.5"));
        assert_eq!(count_pages(&pdf).unwrap(), 3);
    }

    #[test]
    fn page_box_reads_media_box() {
        let pdf = blank_pdf(1, 300.0, 200.0);
        let doc = load(&pdf, "t").unwrap();
        let page_id = doc.page_iter().next().unwrap();
        let b = page_box(&doc, page_id);
        assert!((b.width() - 300.0).abs() < 0.01);
        assert!((b.height() - 200.0).abs() < 0.01);
    }

    #[test]
    fn page_box_inherits_from_parent() {
        let mut doc = load(&blank_pdf(1, 300.0, 200.0), "t").unwrap();
        let page_id = doc.page_iter().next().unwrap();
        let parent = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Parent")
            .unwrap()
            .as_reference()
            .unwrap();
        doc.get_dictionary_mut(page_id).unwrap().remove(b"MediaBox");
        doc.get_dictionary_mut(parent)
            .unwrap()
            .set("MediaBox", rect(0.0, 0.0, 612.0, 792.0));
        let b = page_box(&doc, page_id);
        assert_eq!((b.width(), b.height()), (612.0, 792.0));
        let flat = flatten_inherited(&doc, page_id).unwrap();
        assert!(flat.has(b"MediaBox"));
    }

    #[test]
    fn add_resource_picks_unused_name() {
        let mut doc = load(&blank_pdf(1, 100.0, 100.0), "t").unwrap();
        let page_id = doc.page_iter().next().unwrap();
        let gs = add_opacity_state(&mut doc, 0.5);
        let first = add_resource(&mut doc, page_id, "ExtGState", "GS", gs).unwrap();
        let second = add_resource(&mut doc, page_id, "ExtGState", "GS", gs).unwrap();
        assert_eq!(first, "GS1");
        assert_eq!(second, "GS2");
    }

    #[test]
    fn win_ansi_folds_romanian_letters() {
        assert_eq!(win_ansi("Brașov, Mureș"), b"Brasov, Mures".to_vec());
        assert_eq!(win_ansi("țară"), b"tara".to_vec());
        assert_eq!(win_ansi("în"), vec![0xEE, b'n']);
        assert_eq!(win_ansi("€"), vec![0x80]);
        assert_eq!(win_ansi("日"), b"?".to_vec());
    }

    #[test]
    fn transparent_image_gets_soft_mask() {
        let mut img = RgbaImage::from_pixel(4, 2, Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let pdf_img = PdfImage::from_dynamic(&DynamicImage::ImageRgba8(img));
        let mut doc = Document::with_version("1.5");
        let id = pdf_img.embed(&mut doc);
        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        assert!(stream.dict.has(b"SMask"));
        assert_eq!(stream.dict.get(b"Width").unwrap().as_i64().unwrap(), 4);
    }

    #[test]
    fn opaque_image_has_no_mask() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let pdf_img = PdfImage::from_dynamic(&DynamicImage::ImageRgba8(img));
        let mut doc = Document::with_version("1.5");
        let id = pdf_img.embed(&mut doc);
        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        assert!(!stream.dict.has(b"SMask"));
    }

    #[test]
    fn load_rejects_empty_and_garbage() {
        assert!(matches!(load(b"", "x"), Err(StageError::EmptyInput { .. })));
        assert!(matches!(
            load(b"definitely not a pdf", "x"),
            Err(StageError::CorruptPdf { .. })
        ));
    }
}
