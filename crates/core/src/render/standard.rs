use super::{encode_text, show_line, OverlayEngine};
use crate::error::RenderError;
use crate::layout::OverlayInstruction;
use anchor_model::EngineKind;
use lopdf::{Object, StringFormat};
use pdf_engine::encoding::win_ansi_encode;
use pdf_engine::{CjkFont, FontResource, LayerArtifact, PageSize};

const LATIN_FONT: &str = "F1";
const CJK_FONT: &str = "F2";

/// Non-embedded built-in fonts: Helvetica for WinAnsi text, STSong-Light for everything else in
/// the Basic Multilingual Plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEngine;

enum Encoded {
    Latin(Vec<u8>),
    Cjk(Vec<u8>),
}

fn encode_line(line: &str) -> Result<Encoded, RenderError> {
    if let Some(bytes) = line.chars().map(win_ansi_encode).collect::<Option<Vec<u8>>>() {
        return Ok(Encoded::Latin(bytes));
    }

    let mut bytes = Vec::with_capacity(line.len() * 2);
    for ch in line.chars() {
        let unit = u16::try_from(u32::from(ch)).map_err(|_| RenderError::Unencodable(ch))?;
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Ok(Encoded::Cjk(bytes))
}

impl OverlayEngine for StandardEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Standard
    }

    fn render(&self, page: PageSize, instructions: &[OverlayInstruction]) -> Result<LayerArtifact, RenderError> {
        let mut operations = Vec::new();
        let (mut latin_used, mut cjk_used) = (false, false);

        for instruction in instructions {
            for (baseline, line) in instruction.baselines() {
                let (font, text) = match encode_line(line)? {
                    Encoded::Latin(bytes) => {
                        latin_used = true;
                        (LATIN_FONT, Object::String(bytes, StringFormat::Literal))
                    }
                    Encoded::Cjk(bytes) => {
                        cjk_used = true;
                        (CJK_FONT, Object::String(bytes, StringFormat::Hexadecimal))
                    }
                };
                operations.extend(show_line(font, instruction.font_size, instruction.x, baseline, page, text));
            }
        }

        let mut fonts = Vec::new();
        if latin_used {
            fonts.push((LATIN_FONT.to_owned(), FontResource::Standard { base_font: "Helvetica".to_owned() }));
        }
        if cjk_used {
            fonts.push((CJK_FONT.to_owned(), FontResource::CjkBuiltin(CjkFont::st_song_light())));
        }

        Ok(LayerArtifact::Vector { content: encode_text(operations)?, fonts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::instruction;

    fn letter() -> PageSize {
        PageSize { width_pt: 612.0, height_pt: 792.0 }
    }

    fn font_names(layer: &LayerArtifact) -> Vec<String> {
        match layer {
            LayerArtifact::Vector { fonts, .. } => fonts.iter().map(|(name, _)| name.clone()).collect(),
            LayerArtifact::Raster { .. } => Vec::new(),
        }
    }

    #[test]
    fn latin_text_uses_helvetica_only() {
        let layer = StandardEngine.render(letter(), &[instruction(&["Café – 12"])]).expect("render");
        assert_eq!(font_names(&layer), vec!["F1"]);
    }

    #[test]
    fn cjk_text_uses_the_builtin_cjk_font() {
        let layer = StandardEngine.render(letter(), &[instruction(&["Zhang", "张三"])]).expect("render");
        assert_eq!(font_names(&layer), vec!["F1", "F2"]);

        let LayerArtifact::Vector { content, .. } = layer else {
            panic!("vector layer expected");
        };
        let content = String::from_utf8_lossy(&content).to_lowercase();
        // 张 = U+5F20, 三 = U+4E09; baseline 214 from the top is 578 in user space.
        assert!(content.contains("<5f204e09>"), "{content}");
        assert!(content.contains("578"), "{content}");
    }

    #[test]
    fn characters_outside_the_bmp_are_unencodable() {
        let err = StandardEngine.render(letter(), &[instruction(&["𠀋"])]).expect_err("should fail");
        assert_eq!(err, RenderError::Unencodable('𠀋'));
    }
}
