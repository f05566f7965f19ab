use crate::geometry::Rect;
use crate::RgbaImage;

/// Drawable overlay for one page, produced by an overlay engine and consumed by the merge.
///
/// Vector content is expressed in a coordinate space with its origin at the bottom-left of the
/// page's MediaBox; the merge translates it to the MediaBox origin.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerArtifact {
    Vector { content: Vec<u8>, fonts: Vec<(String, FontResource)> },
    /// Transparent image covering `bounds` (page coordinates).
    Raster { image: RgbaImage, bounds: Rect },
}

impl LayerArtifact {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerArtifact::Vector { .. } => "vector",
            LayerArtifact::Raster { .. } => "raster",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FontResource {
    /// One of the standard 14 fonts, WinAnsi encoded.
    Standard { base_font: String },
    /// Non-embedded CJK font addressed through a predefined Unicode CMap.
    CjkBuiltin(CjkFont),
    Embedded(EmbeddedFont),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CjkFont {
    pub base_font: String,
    pub encoding: String,
    pub ordering: String,
    pub supplement: i64,
}

impl CjkFont {
    /// Adobe's built-in simplified Chinese serif with the UCS-2 horizontal CMap.
    pub fn st_song_light() -> Self {
        Self {
            base_font: "STSong-Light".to_owned(),
            encoding: "UniGB-UCS2-H".to_owned(),
            ordering: "GB1".to_owned(),
            supplement: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontProgramKind {
    TrueType,
    /// OpenType with CFF outlines.
    OpenTypeCff,
}

/// Font program embedded as a Type0 font with Identity-H encoding. Content strings address glyph
/// ids directly.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedFont {
    pub base_font: String,
    pub kind: FontProgramKind,
    pub program: Vec<u8>,
    /// Glyph id to advance width in thousandths of an em.
    pub widths: Vec<(u16, f32)>,
    /// Glyph id to the text it draws, for the ToUnicode map.
    pub to_unicode: Vec<(u16, char)>,
    pub ascent: f32,
    pub descent: f32,
    pub bbox: [f32; 4],
}
