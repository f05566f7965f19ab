//! Positioned character extraction from page content streams.
//!
//! Walks the content operators with a minimal graphics and text state, decodes shown strings
//! through each font's ToUnicode map (or a fallback encoding), and emits one [`PageCharacter`]
//! per decoded character in content order.

use crate::cmap::ToUnicode;
use crate::encoding::win_ansi_decode;
use crate::geometry::{Matrix, PageBox, Rect};
use crate::metrics::helvetica_width;
use crate::objects::{dict_entry, number, resolve, resolve_dict, stream_bytes};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;

const MAX_FORM_DEPTH: usize = 8;
const DEFAULT_DESCENT: f32 = -0.2;
const DEFAULT_CID_WIDTH: f32 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageCharacter {
    pub text: String,
    pub bbox: Rect,
}

/// Extracts characters from already-decoded page content.
pub(crate) fn extract(
    doc: &Document,
    content: &[u8],
    resources: Option<&Dictionary>,
    page_box: PageBox,
) -> Vec<PageCharacter> {
    let mut interpreter = Interpreter { doc, page_box, fonts: HashMap::new(), out: Vec::new() };
    interpreter.run(content, resources, GraphicsState::default(), 0);
    interpreter.out
}

#[derive(Debug, Clone)]
enum Widths {
    Simple { first_char: u32, widths: Vec<f32>, missing: f32 },
    Cid { default: f32, widths: HashMap<u32, f32> },
    /// No width table at all (standard 14 fonts).
    Builtin,
}

#[derive(Debug)]
struct FontInfo {
    two_byte: bool,
    ucs2: bool,
    to_unicode: Option<ToUnicode>,
    widths: Widths,
    descent: f32,
}

impl FontInfo {
    fn load(doc: &Document, font: &Dictionary) -> Self {
        let subtype = dict_entry(doc, font, b"Subtype").and_then(|o| o.as_name().ok()).unwrap_or_default();
        let two_byte = subtype == b"Type0";
        let encoding = dict_entry(doc, font, b"Encoding").and_then(|o| o.as_name().ok()).unwrap_or_default();
        let ucs2 = two_byte && encoding.windows(4).any(|w| w == b"UCS2");

        let to_unicode = dict_entry(doc, font, b"ToUnicode")
            .and_then(|o| o.as_stream().ok())
            .and_then(stream_bytes)
            .map(|bytes| ToUnicode::parse(&bytes))
            .filter(|cmap| !cmap.is_empty());

        let descendant = two_byte
            .then(|| dict_entry(doc, font, b"DescendantFonts"))
            .flatten()
            .and_then(|o| o.as_array().ok())
            .and_then(|array| array.first())
            .and_then(|o| resolve_dict(doc, o));

        let widths = match descendant {
            Some(cid_font) => cid_widths(doc, cid_font),
            None => simple_widths(doc, font),
        };

        let descent = descendant
            .unwrap_or(font)
            .get(b"FontDescriptor")
            .ok()
            .and_then(|o| resolve_dict(doc, o))
            .and_then(|descriptor| dict_entry(doc, descriptor, b"Descent"))
            .and_then(number)
            .filter(|d| *d < 0.0 && *d > -1000.0)
            .map_or(DEFAULT_DESCENT, |d| d / 1000.0);

        Self { two_byte, ucs2, to_unicode, widths, descent }
    }

    /// Splits a shown string into (code, text, byte length) triples.
    fn decode(&self, bytes: &[u8]) -> Vec<(u32, String, usize)> {
        if self.two_byte {
            return bytes
                .chunks(2)
                .map(|pair| {
                    let code = pair.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
                    let text = match self.to_unicode.as_ref().and_then(|cmap| cmap.get(code)) {
                        Some(text) => text.to_owned(),
                        None if self.ucs2 => char::from_u32(code).unwrap_or('\u{FFFD}').to_string(),
                        None => '\u{FFFD}'.to_string(),
                    };
                    (code, text, pair.len())
                })
                .collect();
        }

        bytes
            .iter()
            .map(|byte| {
                let code = u32::from(*byte);
                let text = match self.to_unicode.as_ref().and_then(|cmap| cmap.get(code)) {
                    Some(text) => text.to_owned(),
                    None => win_ansi_decode(*byte).to_string(),
                };
                (code, text, 1)
            })
            .collect()
    }

    /// Advance in thousandths of text space units.
    fn width(&self, code: u32, text: &str) -> f32 {
        match &self.widths {
            Widths::Simple { first_char, widths, missing } => code
                .checked_sub(*first_char)
                .and_then(|index| widths.get(index as usize))
                .copied()
                .unwrap_or(*missing),
            Widths::Cid { default, widths } => widths.get(&code).copied().unwrap_or(*default),
            Widths::Builtin => text.chars().next().map_or(0.0, helvetica_width),
        }
    }
}

fn simple_widths(doc: &Document, font: &Dictionary) -> Widths {
    let Some(array) = dict_entry(doc, font, b"Widths").and_then(|o| o.as_array().ok()) else {
        return Widths::Builtin;
    };
    let first_char = dict_entry(doc, font, b"FirstChar").and_then(number).unwrap_or(0.0).max(0.0) as u32;
    let missing = font
        .get(b"FontDescriptor")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .and_then(|descriptor| dict_entry(doc, descriptor, b"MissingWidth"))
        .and_then(number)
        .unwrap_or(0.0);
    let widths = array.iter().map(|o| resolve(doc, o).and_then(number).unwrap_or(missing)).collect();

    Widths::Simple { first_char, widths, missing }
}

fn cid_widths(doc: &Document, cid_font: &Dictionary) -> Widths {
    let default = dict_entry(doc, cid_font, b"DW").and_then(number).unwrap_or(DEFAULT_CID_WIDTH);
    let mut widths = HashMap::new();

    // `/W [c [w1 w2 ...] cfirst clast w ...]`
    if let Some(array) = dict_entry(doc, cid_font, b"W").and_then(|o| o.as_array().ok()) {
        let items: Vec<&Object> = array.iter().filter_map(|o| resolve(doc, o)).collect();
        let mut i = 0;
        while i < items.len() {
            let Some(start) = number(items[i]) else {
                break;
            };
            let start = start.max(0.0) as u32;
            match items.get(i + 1) {
                Some(Object::Array(list)) => {
                    for (offset, width) in list.iter().enumerate() {
                        if let Some(width) = resolve(doc, width).and_then(number) {
                            widths.insert(start + offset as u32, width);
                        }
                    }
                    i += 2;
                }
                Some(end) => {
                    let (Some(end), Some(width)) = (number(end), items.get(i + 2).and_then(|o| number(o)))
                    else {
                        break;
                    };
                    let end = (end.max(0.0) as u32).min(start.saturating_add(0xFFFF));
                    for code in start..=end {
                        widths.insert(code, width);
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }

    Widths::Cid { default, widths }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Option<Rc<FontInfo>>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    rise: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

struct Interpreter<'a> {
    doc: &'a Document,
    page_box: PageBox,
    fonts: HashMap<ObjectId, Rc<FontInfo>>,
    out: Vec<PageCharacter>,
}

impl<'a> Interpreter<'a> {
    fn run(&mut self, content: &[u8], resources: Option<&'a Dictionary>, initial: GraphicsState, depth: usize) {
        let content = match Content::decode(content) {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(%err, "skipping undecodable content stream");
                return;
            }
        };

        let mut state = initial;
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut text_matrix = Matrix::IDENTITY;
        let mut line_matrix = Matrix::IDENTITY;

        for op in &content.operations {
            let operands = &op.operands;
            let num = |index: usize| operands.get(index).and_then(number);

            match op.operator.as_str() {
                "q" => stack.push(state.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        state = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_operands(operands) {
                        state.ctm = m.then(&state.ctm);
                    }
                }
                "BT" => {
                    text_matrix = Matrix::IDENTITY;
                    line_matrix = Matrix::IDENTITY;
                }
                "ET" => {}
                "Tf" => {
                    if let Some(size) = num(1) {
                        state.font_size = size;
                    }
                    state.font = operands
                        .first()
                        .and_then(|o| o.as_name().ok())
                        .and_then(|name| self.font(resources, name));
                }
                "Tc" => state.char_spacing = num(0).unwrap_or(state.char_spacing),
                "Tw" => state.word_spacing = num(0).unwrap_or(state.word_spacing),
                "Tz" => state.horizontal_scale = num(0).map_or(state.horizontal_scale, |s| s / 100.0),
                "TL" => state.leading = num(0).unwrap_or(state.leading),
                "Ts" => state.rise = num(0).unwrap_or(state.rise),
                "Td" | "TD" => {
                    let (tx, ty) = (num(0).unwrap_or(0.0), num(1).unwrap_or(0.0));
                    if op.operator == "TD" {
                        state.leading = -ty;
                    }
                    line_matrix = Matrix::translate(tx, ty).then(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tm" => {
                    if let Some(m) = matrix_operands(operands) {
                        line_matrix = m;
                        text_matrix = m;
                    }
                }
                "T*" => {
                    line_matrix = Matrix::translate(0.0, -state.leading).then(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show(bytes, &state, &mut text_matrix);
                    }
                }
                "'" | "\"" => {
                    let string_index = if op.operator == "\"" {
                        state.word_spacing = num(0).unwrap_or(state.word_spacing);
                        state.char_spacing = num(1).unwrap_or(state.char_spacing);
                        2
                    } else {
                        0
                    };
                    line_matrix = Matrix::translate(0.0, -state.leading).then(&line_matrix);
                    text_matrix = line_matrix;
                    if let Some(Object::String(bytes, _)) = operands.get(string_index) {
                        self.show(bytes, &state, &mut text_matrix);
                    }
                }
                "TJ" => {
                    let Some(Object::Array(items)) = operands.first() else {
                        continue;
                    };
                    for item in items {
                        match item {
                            Object::String(bytes, _) => self.show(bytes, &state, &mut text_matrix),
                            other => {
                                if let Some(adjust) = number(other) {
                                    let tx = -adjust / 1000.0 * state.font_size * state.horizontal_scale;
                                    text_matrix = Matrix::translate(tx, 0.0).then(&text_matrix);
                                }
                            }
                        }
                    }
                }
                "Do" => {
                    if depth >= MAX_FORM_DEPTH {
                        tracing::debug!(depth, "form nesting limit reached");
                        continue;
                    }
                    if let Some(name) = operands.first().and_then(|o| o.as_name().ok()) {
                        self.form(resources, name, &state, depth);
                    }
                }
                _ => {}
            }
        }
    }

    fn font(&mut self, resources: Option<&'a Dictionary>, name: &[u8]) -> Option<Rc<FontInfo>> {
        let fonts = resources.and_then(|r| dict_entry(self.doc, r, b"Font")).and_then(|o| o.as_dict().ok())?;
        let entry = fonts.get(name).ok()?;

        if let Object::Reference(id) = entry {
            if let Some(cached) = self.fonts.get(id) {
                return Some(Rc::clone(cached));
            }
            let info = Rc::new(FontInfo::load(self.doc, resolve_dict(self.doc, entry)?));
            self.fonts.insert(*id, Rc::clone(&info));
            return Some(info);
        }

        Some(Rc::new(FontInfo::load(self.doc, resolve_dict(self.doc, entry)?)))
    }

    fn form(&mut self, resources: Option<&'a Dictionary>, name: &[u8], state: &GraphicsState, depth: usize) {
        let Some(stream) = resources
            .and_then(|r| dict_entry(self.doc, r, b"XObject"))
            .and_then(|o| o.as_dict().ok())
            .and_then(|xobjects| dict_entry(self.doc, xobjects, name))
            .and_then(|o| o.as_stream().ok())
        else {
            return;
        };
        if dict_entry(self.doc, &stream.dict, b"Subtype").and_then(|o| o.as_name().ok()) != Some(b"Form".as_slice()) {
            return;
        }
        let Some(bytes) = stream_bytes(stream) else {
            return;
        };

        let form_matrix = dict_entry(self.doc, &stream.dict, b"Matrix")
            .and_then(|o| o.as_array().ok())
            .and_then(|array| matrix_operands(array))
            .unwrap_or(Matrix::IDENTITY);
        let form_resources = dict_entry(self.doc, &stream.dict, b"Resources")
            .and_then(|o| o.as_dict().ok())
            .or(resources);

        let mut inner = state.clone();
        inner.ctm = form_matrix.then(&state.ctm);
        self.run(&bytes, form_resources, inner, depth + 1);
    }

    fn show(&mut self, bytes: &[u8], state: &GraphicsState, text_matrix: &mut Matrix) {
        let Some(font) = state.font.clone() else {
            return;
        };
        let size = state.font_size;
        let scale = state.horizontal_scale;
        let font_matrix = Matrix::new(size * scale, 0.0, 0.0, size, 0.0, state.rise);

        for (code, text, len) in font.decode(bytes) {
            let w0 = font.width(code, &text) / 1000.0;
            let render = font_matrix.then(text_matrix).then(&state.ctm);

            if !text.is_empty() {
                let corners = [
                    render.apply(0.0, font.descent),
                    render.apply(w0, font.descent),
                    render.apply(0.0, font.descent + 1.0),
                    render.apply(w0, font.descent + 1.0),
                ];
                let mut bbox: Option<Rect> = None;
                for (x, y) in corners {
                    let (px, py) = self.page_box.to_page(x, y);
                    let point = Rect::new(px, py, px, py);
                    bbox = Some(bbox.map_or(point, |b| b.union(&point)));
                }
                if let Some(bbox) = bbox {
                    self.out.push(PageCharacter { text, bbox });
                }
            }

            let word_spacing = if len == 1 && code == 32 { state.word_spacing } else { 0.0 };
            let tx = (w0 * size + state.char_spacing + word_spacing) * scale;
            *text_matrix = Matrix::translate(tx, 0.0).then(text_matrix);
        }
    }
}

fn matrix_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let v: Vec<f32> = operands.iter().take(6).map(number).collect::<Option<_>>()?;
    Some(Matrix::new(v[0], v[1], v[2], v[3], v[4], v[5]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn helvetica() -> Dictionary {
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        }
    }

    fn run(content: &str, fonts: Dictionary) -> Vec<PageCharacter> {
        let mut doc = Document::with_version("1.5");
        let mut font_refs = Dictionary::new();
        for (name, font) in fonts.iter() {
            let id = doc.add_object(font.clone());
            font_refs.set(name.clone(), Object::Reference(id));
        }
        let resources = dictionary! { "Font" => font_refs };
        let page_box = PageBox { x0: 0.0, y0: 0.0, width: 200.0, height: 100.0 };
        extract(&doc, content.as_bytes(), Some(&resources), page_box)
    }

    fn text_of(chars: &[PageCharacter]) -> String {
        chars.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn builtin_font_uses_helvetica_advances() {
        let fonts = dictionary! { "F1" => helvetica() };
        let chars = run("BT /F1 10 Tf 20 50 Td (Hi) Tj ET", fonts);

        assert_eq!(text_of(&chars), "Hi");
        // 'H' = 722/1000 * 10.
        let h = &chars[0].bbox;
        assert!((h.left - 20.0).abs() < 1e-4);
        assert!((h.right - 27.22).abs() < 1e-3);
        // Baseline at y=50 user space (50 in page space); box spans descent..descent+1 em.
        assert!((h.bottom - 52.0).abs() < 1e-3);
        assert!((h.top - 42.0).abs() < 1e-3);
        assert!((chars[1].bbox.left - 27.22).abs() < 1e-3);
    }

    #[test]
    fn explicit_widths_and_kerning_adjust_positions() {
        let mut font = helvetica();
        font.set("FirstChar", 65);
        font.set("Widths", vec![Object::Integer(500), Object::Integer(600)]);
        let fonts = dictionary! { "F1" => font };

        let chars = run("BT /F1 10 Tf 1 0 0 1 0 20 Tm [(A) -1000 (B)] TJ ET", fonts);

        assert_eq!(text_of(&chars), "AB");
        assert!((chars[0].bbox.right - 5.0).abs() < 1e-4);
        assert!((chars[1].bbox.left - 15.0).abs() < 1e-4);
        assert!((chars[1].bbox.right - 21.0).abs() < 1e-4);
    }

    #[test]
    fn ucs2_type0_font_decodes_utf16() {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "STSong-Light",
            "Encoding" => "UniGB-UCS2-H",
            "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "CIDFontType0",
                "BaseFont" => "STSong-Light",
                "DW" => 1000,
            })],
        };
        let fonts = dictionary! { "F1" => font };

        let chars = run("BT /F1 12 Tf 10 80 Td <8EAB4EFD> Tj ET", fonts);

        assert_eq!(text_of(&chars), "身份");
        assert!((chars[1].bbox.left - 22.0).abs() < 1e-4);
        assert!((chars[1].bbox.right - 34.0).abs() < 1e-4);
    }

    #[test]
    fn graphics_state_is_restored_and_cm_applies() {
        let fonts = dictionary! { "F1" => helvetica() };
        let chars = run("q 1 0 0 1 100 0 cm BT /F1 10 Tf 0 50 Td (a) Tj ET Q BT /F1 10 Tf 0 50 Td (b) Tj ET", fonts);

        assert_eq!(text_of(&chars), "ab");
        assert!((chars[0].bbox.left - 100.0).abs() < 1e-4);
        assert!(chars[1].bbox.left.abs() < 1e-4);
    }

    #[test]
    fn next_line_operators_use_leading() {
        let fonts = dictionary! { "F1" => helvetica() };
        let chars = run("BT /F1 10 Tf 12 TL 0 80 Td (a) Tj T* (b) Tj (c) ' ET", fonts);

        assert_eq!(text_of(&chars), "abc");
        let baseline = |c: &PageCharacter| c.bbox.bottom - 2.0;
        assert!((baseline(&chars[0]) - 20.0).abs() < 1e-3);
        assert!((baseline(&chars[1]) - 32.0).abs() < 1e-3);
        assert!((baseline(&chars[2]) - 44.0).abs() < 1e-3);
    }

    #[test]
    fn text_without_font_is_ignored() {
        let chars = run("BT 0 50 Td (lost) Tj ET", Dictionary::new());
        assert!(chars.is_empty());
    }
}
