//! TrueType fonts embedded in the binary for stamp rasterisation.
//!
//! DejaVu Sans covers the full Romanian alphabet (ă, â, î, ș, ț) and is
//! freely redistributable; see `assets/fonts/LICENSE-DejaVu.txt`.

use crate::error::StageError;
use ab_glyph::FontRef;
use once_cell::sync::Lazy;

static REGULAR_TTF: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");
static BOLD_TTF: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");

static REGULAR: Lazy<Result<FontRef<'static>, String>> =
    Lazy::new(|| FontRef::try_from_slice(REGULAR_TTF).map_err(|e| e.to_string()));
static BOLD: Lazy<Result<FontRef<'static>, String>> =
    Lazy::new(|| FontRef::try_from_slice(BOLD_TTF).map_err(|e| e.to_string()));

fn get(font: &'static Result<FontRef<'static>, String>) -> Result<&'static FontRef<'static>, StageError> {
    font.as_ref()
        .map_err(|e| StageError::RenderFailed(format!("embedded font unusable: {e}")))
}

pub fn regular() -> Result<&'static FontRef<'static>, StageError> {
    get(&REGULAR)
}

pub fn bold() -> Result<&'static FontRef<'static>, StageError> {
    get(&BOLD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_glyph::Font;

    #[test]
    fn fonts_parse_and_cover_romanian() {
        for font in [regular().unwrap(), bold().unwrap()] {
            for c in ['ă', 'â', 'î', 'ș', 'ț', 'Ș', 'Ț', '…'] {
                assert_ne!(font.glyph_id(c).0, 0, "missing glyph for {c}");
            }
        }
    }
}
