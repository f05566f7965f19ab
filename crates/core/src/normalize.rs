//! Canonical matching text with a mapping back to extracted characters.

use pdf_engine::PageCharacter;
use std::ops::Range;

/// Folds visually equivalent punctuation to ASCII and lower-cases. Whitespace maps to nothing.
fn fold(ch: char, out: &mut Vec<char>) {
    let folded = match ch as u32 {
        0x3000 => ' ',
        // Full-width ASCII block.
        code @ 0xFF01..=0xFF5E => char::from_u32(code - 0xFEE0).unwrap_or(ch),
        0x2018 | 0x2019 | 0x201A | 0x201B | 0x2032 => '\'',
        0x201C | 0x201D | 0x201E | 0x201F | 0x2033 => '"',
        0x2010..=0x2015 | 0x2212 | 0xFE58 | 0xFE63 => '-',
        _ => ch,
    };

    if folded.is_whitespace() {
        return;
    }
    out.extend(folded.to_lowercase());
}

/// Normalized form of an anchor candidate.
pub fn normalize(text: &str) -> String {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        fold(ch, &mut out);
    }
    out.into_iter().collect()
}

/// Normalized page text. Every normalized position resolves to the index of the
/// [`PageCharacter`] it came from, and every character to the normalized span it produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextIndex {
    chars: Vec<char>,
    origin: Vec<usize>,
    spans: Vec<Range<usize>>,
}

impl TextIndex {
    pub fn build(characters: &[PageCharacter]) -> Self {
        let mut chars = Vec::with_capacity(characters.len());
        let mut origin = Vec::with_capacity(characters.len());
        let mut spans = Vec::with_capacity(characters.len());
        let mut buffer = Vec::new();

        for (index, character) in characters.iter().enumerate() {
            buffer.clear();
            for ch in character.text.chars() {
                fold(ch, &mut buffer);
            }
            let start = chars.len();
            chars.extend_from_slice(&buffer);
            origin.extend(std::iter::repeat(index).take(buffer.len()));
            spans.push(start..chars.len());
        }

        Self { chars, origin, spans }
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Index of the extracted character behind normalized position `position`.
    pub fn original_index(&self, position: usize) -> Option<usize> {
        self.origin.get(position).copied()
    }

    /// Extracted characters covered by the normalized range `range`.
    pub fn original_range(&self, range: Range<usize>) -> Option<Range<usize>> {
        if range.is_empty() {
            return None;
        }
        let first = self.original_index(range.start)?;
        let last = self.original_index(range.end - 1)?;
        Some(first..last + 1)
    }

    /// Normalized span produced by extracted character `index` (empty for whitespace).
    pub fn normalized_span(&self, index: usize) -> Option<Range<usize>> {
        self.spans.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_engine::Rect;

    fn chars(text: &str) -> Vec<PageCharacter> {
        text.chars()
            .enumerate()
            .map(|(i, ch)| PageCharacter {
                text: ch.to_string(),
                bbox: Rect::new(i as f32 * 10.0, 0.0, i as f32 * 10.0 + 10.0, 12.0),
            })
            .collect()
    }

    #[test]
    fn folds_full_width_punctuation_and_case() {
        assert_eq!(normalize("身份证号："), "身份证号:");
        assert_eq!(normalize("Ｎａｍｅ　Ｘ"), "namex");
        assert_eq!(normalize("“Quoted” — it’s"), "\"quoted\"-it's");
    }

    #[test]
    fn index_maps_back_across_dropped_whitespace() {
        let page = chars("Name : Bob");
        let index = TextIndex::build(&page);

        assert_eq!(index.chars().iter().collect::<String>(), "name:bob");
        // ':' is normalized position 4 and extracted character 5.
        assert_eq!(index.original_index(4), Some(5));
        assert_eq!(index.original_range(4..6), Some(5..8));
        assert_eq!(index.normalized_span(4), Some(4..4));
        assert_eq!(index.normalized_span(5), Some(4..5));
    }

    #[test]
    fn multi_character_glyphs_share_an_origin() {
        let mut page = chars("a");
        page.push(PageCharacter { text: "ﬁ".to_owned(), bbox: Rect::default() });
        page.push(PageCharacter { text: "FI".to_owned(), bbox: Rect::default() });
        let index = TextIndex::build(&page);

        assert_eq!(index.len(), 4);
        assert_eq!(index.original_index(2), Some(2));
        assert_eq!(index.original_index(3), Some(2));
    }

    #[test]
    fn empty_page_gives_empty_index() {
        let index = TextIndex::build(&[]);
        assert!(index.is_empty());
        assert_eq!(index.original_range(0..1), None);
    }
}
