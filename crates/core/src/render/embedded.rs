use super::{encode_text, show_line, OverlayEngine, SharedFont};
use crate::error::RenderError;
use crate::layout::OverlayInstruction;
use ab_glyph::GlyphId;
use anchor_model::EngineKind;
use lopdf::{Object, StringFormat};
use pdf_engine::{EmbeddedFont, FontResource, LayerArtifact, PageSize};
use std::collections::BTreeMap;

const FONT_NAME: &str = "F1";

/// Embeds the configured font file as a Type0 font and writes glyph ids directly.
#[derive(Debug, Clone)]
pub struct EmbeddedEngine {
    font: SharedFont,
}

impl EmbeddedEngine {
    pub fn new(font: SharedFont) -> Self {
        Self { font }
    }
}

impl OverlayEngine for EmbeddedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Embedded
    }

    fn render(&self, page: PageSize, instructions: &[OverlayInstruction]) -> Result<LayerArtifact, RenderError> {
        let font = self.font.as_deref().map_err(RenderError::clone)?;
        if font.collection {
            return Err(RenderError::FontUnusable("font collections cannot be embedded".to_owned()));
        }

        let mut used: BTreeMap<u16, char> = BTreeMap::new();
        let mut operations = Vec::new();

        for instruction in instructions {
            for (baseline, line) in instruction.baselines() {
                let mut bytes = Vec::with_capacity(line.len() * 2);
                for ch in line.chars() {
                    let glyph = match font.glyph(ch) {
                        Some(glyph) => glyph,
                        // Unmapped whitespace still advances by the .notdef width.
                        None if ch.is_whitespace() => GlyphId(0),
                        None => return Err(RenderError::MissingGlyph(ch)),
                    };
                    used.entry(glyph.0).or_insert(ch);
                    bytes.extend_from_slice(&glyph.0.to_be_bytes());
                }
                let text = Object::String(bytes, StringFormat::Hexadecimal);
                operations.extend(show_line(FONT_NAME, instruction.font_size, instruction.x, baseline, page, text));
            }
        }

        let ascent = font.ascent_1000();
        let descent = font.descent_1000();
        let widths = used.keys().map(|&gid| (gid, font.advance_1000(GlyphId(gid)))).collect();
        let to_unicode = used.into_iter().filter(|&(gid, _)| gid != 0).collect();
        let embedded = EmbeddedFont {
            base_font: font.name.clone(),
            kind: font.kind,
            program: font.bytes.clone(),
            widths,
            to_unicode,
            ascent,
            descent,
            bbox: [0.0, descent, 1000.0, ascent],
        };

        Ok(LayerArtifact::Vector {
            content: encode_text(operations)?,
            fonts: vec![(FONT_NAME.to_owned(), FontResource::Embedded(embedded))],
        })
    }
}
