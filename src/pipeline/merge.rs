//! Concatenating PDFs, skipping inputs that cannot be parsed.

use super::pdf;
use crate::error::StageError;
use crate::output::PdfOutput;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A merge input that was left out.
#[derive(Debug, Clone)]
pub struct SkippedInput {
    /// Position in the input list.
    pub index: usize,
    pub reason: StageError,
}

/// Result of [`merge_pdfs`].
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub output: PdfOutput,
    pub skipped: Vec<SkippedInput>,
}

/// Pages of one input, renumbered into the output's id space.
struct LoadedInput {
    objects: BTreeMap<ObjectId, Object>,
    pages: Vec<(ObjectId, Dictionary)>,
    max_id: u32,
}

fn input_name(index: usize) -> String {
    format!("input #{}", index + 1)
}

fn object_type(obj: &Object) -> Option<&[u8]> {
    let dict = match obj {
        Object::Dictionary(d) => d,
        Object::Stream(s) => &s.dict,
        _ => return None,
    };
    dict.get(b"Type").and_then(Object::as_name).ok()
}

/// Load one input and prepare its pages for copying. Either every page of
/// the input is returned or the input is rejected as a whole.
fn load_input(bytes: &[u8], index: usize, first_id: u32) -> Result<LoadedInput, StageError> {
    let name = input_name(index);
    let mut doc = pdf::load(bytes, &name)?;
    doc.renumber_objects_with(first_id);

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(StageError::corrupt(&name, "document has no pages"));
    }
    let pages = page_ids
        .iter()
        .map(|&id| pdf::flatten_inherited(&doc, id).map(|dict| (id, dict)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StageError::corrupt(&name, e))?;

    let max_id = doc.max_id;
    let objects = doc
        .objects
        .into_iter()
        .filter(|(_, obj)| {
            !matches!(
                object_type(obj),
                Some(b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" | b"XRef" | b"ObjStm")
            )
        })
        .collect();
    Ok(LoadedInput {
        objects,
        pages,
        max_id,
    })
}

/// Concatenate `inputs` in order into one PDF.
///
/// * no inputs: [`StageError::NothingToMerge`]
/// * one input: validated and returned byte-for-byte
/// * several: unparseable inputs are skipped and reported in
///   [`MergeOutput::skipped`]; if no pages remain the merge fails with
///   [`StageError::NoPagesMerged`]
pub fn merge_pdfs<B: AsRef<[u8]>>(inputs: &[B]) -> Result<MergeOutput, StageError> {
    match inputs {
        [] => Err(StageError::NothingToMerge),
        [only] => {
            let bytes = only.as_ref();
            let doc = pdf::load(bytes, &input_name(0))?;
            let page_count = doc.get_pages().len() as u32;
            if page_count == 0 {
                return Err(StageError::NoPagesMerged {
                    total: 1,
                    skipped: 0,
                });
            }
            Ok(MergeOutput {
                output: PdfOutput {
                    pdf: bytes.to_vec(),
                    page_count,
                },
                skipped: Vec::new(),
            })
        }
        _ => merge_many(inputs),
    }
}

fn merge_many<B: AsRef<[u8]>>(inputs: &[B]) -> Result<MergeOutput, StageError> {
    let mut objects = BTreeMap::new();
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut skipped = Vec::new();
    let mut next_id = 1;

    for (index, bytes) in inputs.iter().enumerate() {
        match load_input(bytes.as_ref(), index, next_id) {
            Ok(loaded) => {
                next_id = loaded.max_id + 1;
                objects.extend(loaded.objects);
                pages.extend(loaded.pages);
            }
            Err(reason) => {
                warn!("Skipping merge {}: {}", input_name(index), reason);
                skipped.push(SkippedInput { index, reason });
            }
        }
    }

    if pages.is_empty() {
        return Err(StageError::NoPagesMerged {
            total: inputs.len(),
            skipped: skipped.len(),
        });
    }

    let mut doc = Document::with_version("1.5");
    doc.objects = objects;
    doc.max_id = next_id;
    let pages_id = doc.new_object_id();

    let page_count = pages.len();
    let mut kids = Vec::with_capacity(page_count);
    for (id, mut dict) in pages {
        dict.set("Parent", pages_id);
        doc.objects.insert(id, Object::Dictionary(dict));
        kids.push(Object::Reference(id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let pdf = pdf::save(&mut doc)?;
    info!(
        "Merged {} of {} inputs into {} pages",
        inputs.len() - skipped.len(),
        inputs.len(),
        page_count
    );
    Ok(MergeOutput {
        output: PdfOutput {
            pdf,
            page_count: page_count as u32,
        },
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pdf::{page_box, DocumentBuilder};

    fn pdf_with_pages(n: usize, side: f32) -> Vec<u8> {
        let mut b = DocumentBuilder::new();
        for _ in 0..n {
            b.add_page(side, side, Dictionary::new(), vec![]).unwrap();
        }
        b.finish().unwrap()
    }

    fn page_widths(bytes: &[u8]) -> Vec<f32> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| page_box(&doc, id).width())
            .collect()
    }

    #[test]
    fn empty_input_is_an_error() {
        let inputs: Vec<Vec<u8>> = Vec::new();
        assert!(matches!(merge_pdfs(&inputs), Err(StageError::NothingToMerge)));
    }

    #[test]
    fn single_input_is_returned_unchanged() {
        let pdf = pdf_with_pages(3, 100.0);
        let merged = merge_pdfs(&[pdf.clone()]).unwrap();
        assert_eq!(merged.output.pdf, pdf);
        assert_eq!(merged.output.page_count, 3);
        assert!(merged.skipped.is_empty());
    }

    #[test]
    fn single_corrupt_input_fails() {
        let err = merge_pdfs(&[b"garbage".to_vec()]).unwrap_err();
        assert!(matches!(err, StageError::CorruptPdf { .. }));
    }

    #[test]
    fn corrupt_input_in_the_middle_is_skipped() {
        let a = pdf_with_pages(2, 100.0);
        let b = pdf_with_pages(3, 200.0);
        let merged = merge_pdfs(&[a, b"not a pdf at all".to_vec(), b]).unwrap();

        assert_eq!(merged.output.page_count, 5);
        assert_eq!(merged.skipped.len(), 1);
        assert_eq!(merged.skipped[0].index, 1);
        assert_eq!(
            page_widths(&merged.output.pdf),
            vec![100.0, 100.0, 200.0, 200.0, 200.0]
        );
    }

    #[test]
    fn input_order_is_preserved() {
        let merged = merge_pdfs(&[
            pdf_with_pages(1, 300.0),
            pdf_with_pages(1, 100.0),
            pdf_with_pages(1, 200.0),
        ])
        .unwrap();
        assert_eq!(page_widths(&merged.output.pdf), vec![300.0, 100.0, 200.0]);
    }

    #[test]
    fn all_inputs_corrupt_is_an_error() {
        let err = merge_pdfs(&[b"x".to_vec(), Vec::new()]).unwrap_err();
        assert!(
            matches!(err, StageError::NoPagesMerged { total: 2, skipped: 2 }),
            "{err:?}"
        );
    }

    #[test]
    fn inherited_media_box_survives_merge() {
        let mut doc = Document::load_mem(&pdf_with_pages(1, 150.0)).unwrap();
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
            .set("MediaBox", pdf::rect(0.0, 0.0, 420.0, 420.0));
        let mut inherited = Vec::new();
        doc.save_to(&mut inherited).unwrap();

        let merged = merge_pdfs(&[pdf_with_pages(1, 100.0), inherited]).unwrap();
        assert_eq!(page_widths(&merged.output.pdf), vec![100.0, 420.0]);
    }
}
