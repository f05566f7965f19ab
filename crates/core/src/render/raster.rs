use super::{OverlayEngine, SharedFont};
use crate::error::RenderError;
use crate::layout::OverlayInstruction;
use crate::metrics::LoadedFont;
use ab_glyph::{Font, ScaleFont};
use anchor_model::{EngineKind, RASTER_SCALE_RANGE};
use image::Rgba;
use imageproc::drawing::draw_text_mut;
use pdf_engine::{LayerArtifact, PageSize, Rect, RgbaImage};

/// Padding around the drawn text, in points.
const PADDING: f32 = 1.0;

/// Rasterizes the text into a transparent image placed over the page. Works with any font
/// ab_glyph can read, including collections and fonts that refuse embedding.
#[derive(Debug, Clone)]
pub struct RasterEngine {
    font: SharedFont,
}

impl RasterEngine {
    pub fn new(font: SharedFont) -> Self {
        Self { font }
    }
}

/// First visible character the font would draw as `.notdef`.
fn missing_glyph(font: &LoadedFont, instructions: &[OverlayInstruction]) -> Option<char> {
    instructions
        .iter()
        .flat_map(|instruction| instruction.plan.lines.iter())
        .flat_map(|line| line.chars())
        .find(|&ch| !ch.is_whitespace() && font.glyph(ch).is_none())
}

fn text_bounds(font: &LoadedFont, instructions: &[OverlayInstruction], page: PageSize) -> Option<Rect> {
    let boxes: Vec<Rect> = instructions
        .iter()
        .flat_map(|instruction| {
            let size = instruction.font_size;
            let ascent = font.ascent_1000() * size / 1000.0;
            let descent = -font.descent_1000() * size / 1000.0;
            instruction.baselines().map(move |(baseline, line)| {
                let width: f32 = line
                    .chars()
                    .map(|ch| font.advance_1000(font.font.glyph_id(ch)) * size / 1000.0)
                    .sum();
                Rect::new(instruction.x, baseline - ascent, instruction.x + width, baseline + descent)
            })
        })
        .collect();

    let union = Rect::union_all(&boxes)?;
    let padded = Rect::new(
        (union.left - PADDING).max(0.0),
        (union.top - PADDING).max(0.0),
        (union.right + PADDING).min(page.width_pt),
        (union.bottom + PADDING).min(page.height_pt),
    );
    (padded.width() > 0.0 && padded.height() > 0.0).then_some(padded)
}

impl OverlayEngine for RasterEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Raster
    }

    fn render(&self, page: PageSize, instructions: &[OverlayInstruction]) -> Result<LayerArtifact, RenderError> {
        let font = self.font.as_deref().map_err(RenderError::clone)?;
        if let Some(ch) = missing_glyph(font, instructions) {
            return Err(RenderError::MissingGlyph(ch));
        }
        let bounds = text_bounds(font, instructions, page)
            .ok_or_else(|| RenderError::Backend("nothing to draw on this page".to_owned()))?;

        let scale = instructions
            .iter()
            .map(|instruction| instruction.raster_scale)
            .fold(*RASTER_SCALE_RANGE.start(), f32::max)
            .min(*RASTER_SCALE_RANGE.end());
        let pixel_width = (bounds.width() * scale).ceil().max(1.0) as u32;
        let pixel_height = (bounds.height() * scale).ceil().max(1.0) as u32;
        let mut image = RgbaImage::new(pixel_width, pixel_height);
        let ink = Rgba([0, 0, 0, 255]);

        for instruction in instructions {
            let px_scale = font
                .font
                .pt_to_px_scale(instruction.font_size * scale)
                .ok_or_else(|| RenderError::FontUnusable("font has no units per em".to_owned()))?;
            let ascent_px = font.font.as_scaled(px_scale).ascent();

            for (baseline, line) in instruction.baselines() {
                let x = ((instruction.x - bounds.left) * scale).round() as i32;
                let y = ((baseline - bounds.top) * scale - ascent_px).round() as i32;
                draw_text_mut(&mut image, ink, x, y, px_scale, &font.font, line);
            }
        }

        // Placed at exactly the drawn pixel size so the image is not stretched.
        let placed = Rect::new(
            bounds.left,
            bounds.top,
            bounds.left + pixel_width as f32 / scale,
            bounds.top + pixel_height as f32 / scale,
        );
        Ok(LayerArtifact::Raster { image, bounds: placed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_fonts::system_font;
    use crate::render::tests::instruction;
    use std::sync::Arc;

    fn letter() -> PageSize {
        PageSize { width_pt: 612.0, height_pt: 792.0 }
    }

    #[test]
    fn no_font_fails() {
        let engine = RasterEngine::new(Err(RenderError::NoFont));
        let err = engine.render(letter(), &[instruction(&["Alice"])]).expect_err("should fail");
        assert_eq!(err, RenderError::NoFont);
    }

    #[test]
    fn draws_opaque_ink_inside_the_text_bounds() {
        let Some(font) = system_font() else {
            return;
        };
        let engine = RasterEngine::new(Ok(Arc::new(font)));
        let layer = engine.render(letter(), &[instruction(&["Alice", "Smith"])]).expect("render");

        let LayerArtifact::Raster { image, bounds } = layer else {
            panic!("raster layer expected");
        };
        assert!(bounds.left <= 100.0 && bounds.top < 200.0);
        assert!(bounds.bottom > 214.0);
        // instruction() uses a 2x scale.
        assert!((image.width() as f32 - bounds.width() * 2.0).abs() < 1e-3);
        assert!(image.pixels().any(|pixel| pixel.0[3] > 128));
        assert_eq!(image.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn latin_font_misses_cjk_glyphs() {
        let Some(font) = system_font() else {
            return;
        };
        if font.glyph('份').is_some() {
            return;
        }
        let engine = RasterEngine::new(Ok(Arc::new(font)));
        let err = engine.render(letter(), &[instruction(&["Alice", "A 份"])]).expect_err("should fail");
        assert_eq!(err, RenderError::MissingGlyph('份'));
    }
}
