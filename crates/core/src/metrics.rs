//! Character widths for wrapping, and loading of the configured font file.

use crate::error::RenderError;
use ab_glyph::{Font, FontArc, GlyphId};
use pdf_engine::metrics::helvetica_width;
use pdf_engine::FontProgramKind;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub trait FontMetrics: Send + Sync {
    /// Advance of `ch` at `size` points, in points.
    fn char_width(&self, ch: char, size: f32) -> f32;

    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|ch| self.char_width(ch, size)).sum()
    }
}

/// Widths from the Helvetica AFM table, with wide characters at one em. Used when no font file
/// is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedMetrics;

impl FontMetrics for EstimatedMetrics {
    fn char_width(&self, ch: char, size: f32) -> f32 {
        helvetica_width(ch) * size / 1000.0
    }
}

/// A TrueType/OpenType file loaded once per run and shared by the layout and the engines.
#[derive(Debug, Clone)]
pub struct LoadedFont {
    pub name: String,
    pub kind: FontProgramKind,
    pub bytes: Vec<u8>,
    pub font: FontArc,
    /// Font collections can be rasterized but not embedded.
    pub collection: bool,
}

impl LoadedFont {
    pub fn from_file(path: &Path) -> Result<Self, RenderError> {
        let bytes = fs::read(path)
            .map_err(|err| RenderError::FontUnusable(format!("{}: {err}", path.display())))?;
        let name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
        Self::from_bytes(&name, bytes)
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Self, RenderError> {
        let collection = bytes.starts_with(b"ttcf");
        let kind = if bytes.starts_with(b"OTTO") { FontProgramKind::OpenTypeCff } else { FontProgramKind::TrueType };
        let font = FontArc::try_from_vec(bytes.clone()).map_err(|err| RenderError::FontUnusable(err.to_string()))?;

        Ok(Self { name: postscript_name(name), kind, bytes, font, collection })
    }

    pub fn units_per_em(&self) -> f32 {
        self.font.units_per_em().unwrap_or(1000.0)
    }

    /// Glyph for `ch`, or `None` when the font maps it to `.notdef`.
    pub fn glyph(&self, ch: char) -> Option<GlyphId> {
        let id = self.font.glyph_id(ch);
        (id.0 != 0).then_some(id)
    }

    /// Advance of `glyph` in thousandths of an em.
    pub fn advance_1000(&self, glyph: GlyphId) -> f32 {
        self.font.h_advance_unscaled(glyph) * 1000.0 / self.units_per_em()
    }

    pub fn ascent_1000(&self) -> f32 {
        self.font.ascent_unscaled() * 1000.0 / self.units_per_em()
    }

    pub fn descent_1000(&self) -> f32 {
        self.font.descent_unscaled() * 1000.0 / self.units_per_em()
    }
}

/// Widths measured from a loaded font; characters without a glyph fall back to estimates.
#[derive(Debug, Clone)]
pub struct GlyphMetrics {
    font: Arc<LoadedFont>,
}

impl GlyphMetrics {
    pub fn new(font: Arc<LoadedFont>) -> Self {
        Self { font }
    }
}

impl FontMetrics for GlyphMetrics {
    fn char_width(&self, ch: char, size: f32) -> f32 {
        match self.font.glyph(ch) {
            Some(glyph) => self.font.advance_1000(glyph) * size / 1000.0,
            None => EstimatedMetrics.char_width(ch, size),
        }
    }
}

/// PDF names may not contain whitespace or delimiters; keep the printable ASCII subset.
fn postscript_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '+'))
        .collect();
    if cleaned.is_empty() {
        "AnchorFillFont".to_owned()
    } else {
        cleaned
    }
}
