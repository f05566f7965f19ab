//! Write position, line wrapping and edge protection for one matched anchor.

use crate::matcher::MatchResult;
use crate::metrics::FontMetrics;
use anchor_model::{AnchorRule, RunParams, DEFAULT_RASTER_SCALE};
use pdf_engine::PageSize;
use serde::Serialize;

/// Ascent and descent as fractions of the font size, used for the vertical extent of a block.
pub const ASCENT_RATIO: f32 = 0.8;
pub const DESCENT_RATIO: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrapPlan {
    pub lines: Vec<String>,
    /// Offset of each line's baseline below the first baseline.
    pub offsets: Vec<f32>,
}

impl WrapPlan {
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayInstruction {
    pub page: u32,
    pub anchor: String,
    /// Left edge of every line, page coordinates.
    pub x: f32,
    /// First baseline, page coordinates (y grows down).
    pub y: f32,
    pub plan: WrapPlan,
    pub font_size: f32,
    pub raster_scale: f32,
}

impl OverlayInstruction {
    pub fn baselines(&self) -> impl Iterator<Item = (f32, &str)> + '_ {
        self.plan.lines.iter().zip(&self.plan.offsets).map(|(line, offset)| (self.y + offset, line.as_str()))
    }
}

/// Splits a paragraph into breakable units: each word keeps the whitespace that follows it, and
/// leading whitespace stays with the first word.
fn units(paragraph: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut after_space = false;
    let mut seen_word = false;

    for (i, ch) in paragraph.char_indices() {
        let space = ch.is_whitespace();
        if !space && after_space && seen_word {
            units.push(&paragraph[start..i]);
            start = i;
        }
        seen_word |= !space;
        after_space = space;
    }
    if start < paragraph.len() {
        units.push(&paragraph[start..]);
    }
    units
}

/// Width of a line as drawn. Trailing whitespace is not visible.
fn visible_width(line: &str, metrics: &dyn FontMetrics, size: f32) -> f32 {
    metrics.text_width(line.trim_end(), size)
}

/// Breaks `text` into lines no wider than `max_width`. Explicit newlines always break.
///
/// Whitespace-separated words are the units when the text has any; otherwise (and for words
/// that are too wide on their own) characters are. A single character wider than the limit
/// occupies a line by itself. Every character of a paragraph is kept: the whitespace at a break
/// stays at the end of the earlier line.
pub fn wrap(text: &str, max_width: Option<f32>, metrics: &dyn FontMetrics, size: f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line)) {
        let Some(max_width) = max_width else {
            lines.push(paragraph.to_owned());
            continue;
        };

        let fits = |line: &str| visible_width(line, metrics, size) <= max_width;
        let mut current = String::new();

        for unit in units(paragraph) {
            let candidate = format!("{current}{unit}");
            if fits(&candidate) {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if fits(unit) {
                current = unit.to_owned();
                continue;
            }
            for ch in unit.chars() {
                let mut candidate = current.clone();
                candidate.push(ch);
                if current.is_empty() || ch.is_whitespace() || fits(&candidate) {
                    current = candidate;
                } else {
                    lines.push(std::mem::replace(&mut current, ch.to_string()));
                }
            }
        }

        lines.push(current);
    }

    lines
}

/// Resolves the overlay for `value` written next to `found`, keeping every baseline within the
/// page's edge margin.
pub fn resolve(
    rule: &AnchorRule,
    found: &MatchResult,
    value: &str,
    page: PageSize,
    params: &RunParams,
    metrics: &dyn FontMetrics,
) -> OverlayInstruction {
    let size = params.font_size;
    let lines = wrap(value, rule.max_width, metrics, size);
    let widest = lines.iter().map(|line| visible_width(line, metrics, size)).fold(0.0f32, f32::max);

    let (width, height) = (page.width_pt, page.height_pt);
    let margin = rule.edge_margin.unwrap_or(params.edge_margin).min(width / 2.0).min(height / 2.0);
    let mut spacing = rule.line_spacing.unwrap_or(params.line_spacing);
    let ascent = ASCENT_RATIO * size;
    let descent = DESCENT_RATIO * size;

    let mut x = found.bbox.right + rule.offset_x;
    let mut y = found.bbox.bottom + rule.offset_y;

    let overflow = x + widest - (width - margin);
    if overflow > 0.0 {
        x -= overflow;
    }
    x = x.max(margin).min(width - margin);
    if x + widest > width - margin {
        tracing::debug!(
            anchor = %rule.name,
            widest,
            usable = width - 2.0 * margin,
            "value is wider than the page, it runs past the right margin"
        );
    }

    let gaps = lines.len().saturating_sub(1) as f32;
    let usable = height - 2.0 * margin;
    if gaps > 0.0 && ascent + gaps * spacing + descent > usable {
        let compressed = ((usable - ascent - descent) / gaps).max(0.0).min(usable / gaps);
        tracing::debug!(anchor = %rule.name, from = spacing, to = compressed, "line spacing compressed to fit page");
        spacing = compressed;
    }

    let block_bottom = y + gaps * spacing + descent;
    if block_bottom > height - margin {
        y -= block_bottom - (height - margin);
    }
    if y - ascent < margin {
        y = margin + ascent;
    }
    let last_allowed = (height - margin - gaps * spacing).max(margin);
    y = y.max(margin).min(last_allowed);

    let offsets = (0..lines.len()).map(|i| i as f32 * spacing).collect();
    let raster_scale = params.raster_scale.or(rule.raster_scale).unwrap_or(DEFAULT_RASTER_SCALE);

    OverlayInstruction {
        page: found.page,
        anchor: rule.name.clone(),
        x,
        y,
        plan: WrapPlan { lines, offsets },
        font_size: size,
        raster_scale,
    }
}
