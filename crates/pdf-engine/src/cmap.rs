//! ToUnicode CMap parsing (`bfchar` and `bfrange` sections only).

use std::collections::HashMap;

/// Upper bound on codes expanded from a single `bfrange` entry.
const MAX_RANGE_SPAN: u32 = 0x1_0000;

#[derive(Debug, Clone, Default)]
pub(crate) struct ToUnicode {
    map: HashMap<u32, String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hex(Vec<u8>),
    ArrayOpen,
    ArrayClose,
    Word(String),
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Char,
    Range,
}

impl ToUnicode {
    pub(crate) fn parse(data: &[u8]) -> Self {
        let tokens = tokenize(data);
        let mut map = HashMap::new();
        let mut section = Section::None;
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Word(word) if word == "beginbfchar" => section = Section::Char,
                Token::Word(word) if word == "beginbfrange" => section = Section::Range,
                Token::Word(word) if word.starts_with("end") => section = Section::None,
                Token::Hex(src) if section == Section::Char => {
                    if let Some(Token::Hex(dst)) = tokens.get(i + 1) {
                        map.insert(code_of(src), utf16_text(dst));
                        i += 1;
                    }
                }
                Token::Hex(lo) if section == Section::Range => {
                    let Some(Token::Hex(hi)) = tokens.get(i + 1) else {
                        i += 1;
                        continue;
                    };
                    let (lo, hi) = (code_of(lo), code_of(hi));
                    match tokens.get(i + 2) {
                        Some(Token::Hex(dst)) => {
                            expand_incrementing(&mut map, lo, hi, dst);
                            i += 2;
                        }
                        Some(Token::ArrayOpen) => {
                            let mut j = i + 3;
                            let mut code = lo;
                            while let Some(Token::Hex(dst)) = tokens.get(j) {
                                if code <= hi {
                                    map.insert(code, utf16_text(dst));
                                }
                                code = code.saturating_add(1);
                                j += 1;
                            }
                            // `j` sits on the closing bracket.
                            i = j;
                        }
                        _ => i += 1,
                    }
                }
                _ => {}
            }
            i += 1;
        }

        Self { map }
    }

    pub(crate) fn get(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn expand_incrementing(map: &mut HashMap<u32, String>, lo: u32, hi: u32, dst: &[u8]) {
    if hi < lo || hi - lo >= MAX_RANGE_SPAN {
        return;
    }

    let mut units: Vec<u16> =
        dst.chunks(2).map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)])).collect();
    if units.is_empty() {
        return;
    }

    for code in lo..=hi {
        map.insert(code, String::from_utf16_lossy(&units));
        if let Some(last) = units.last_mut() {
            *last = last.wrapping_add(1);
        }
    }
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().take(4).fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
}

fn utf16_text(bytes: &[u8]) -> String {
    let units: Vec<u16> =
        bytes.chunks(2).map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)])).collect();
    String::from_utf16_lossy(&units)
}

fn tokenize(data: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b'<' if data.get(i + 1) == Some(&b'<') => {
                tokens.push(Token::Word("<<".to_owned()));
                i += 2;
            }
            b'<' => {
                let start = i + 1;
                let end = data[start..].iter().position(|b| *b == b'>').map_or(data.len(), |p| start + p);
                let digits: Vec<u8> =
                    data[start..end].iter().copied().filter(u8::is_ascii_hexdigit).collect();
                tokens.push(Token::Hex(hex_bytes(&digits)));
                i = end + 1;
            }
            b'[' => {
                tokens.push(Token::ArrayOpen);
                i += 1;
            }
            b']' => {
                tokens.push(Token::ArrayClose);
                i += 1;
            }
            b'(' => {
                // Literal strings only appear in CMap metadata; skip them.
                let mut depth = 0usize;
                while i < data.len() {
                    match data[i] {
                        b'\\' => i += 1,
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            byte if byte.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < data.len()
                    && !data[i].is_ascii_whitespace()
                    && !matches!(data[i], b'<' | b'>' | b'[' | b']' | b'(' | b'%')
                {
                    i += 1;
                }
                if i == start {
                    i += 1;
                } else {
                    tokens.push(Token::Word(String::from_utf8_lossy(&data[start..i]).into_owned()));
                }
            }
        }
    }

    tokens
}

fn hex_bytes(digits: &[u8]) -> Vec<u8> {
    let value = |digit: u8| match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    };

    digits
        .chunks(2)
        .map(|pair| (value(pair[0]) << 4) | pair.get(1).map_or(0, |low| value(*low)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = br"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0011> <8EAB>
endbfchar
2 beginbfrange
<0024> <0026> <0041>
<0030> <0031> [<4EFD> <8BC1>]
endbfrange
endcmap";

    #[test]
    fn parses_chars_and_ranges() {
        let cmap = ToUnicode::parse(SAMPLE);

        assert_eq!(cmap.get(0x03), Some(" "));
        assert_eq!(cmap.get(0x11), Some("身"));
        assert_eq!(cmap.get(0x24), Some("A"));
        assert_eq!(cmap.get(0x26), Some("C"));
        assert_eq!(cmap.get(0x30), Some("份"));
        assert_eq!(cmap.get(0x31), Some("证"));
        assert_eq!(cmap.get(0x27), None);
        assert!(!cmap.is_empty());
    }

    #[test]
    fn codespace_range_is_not_mistaken_for_a_mapping() {
        let cmap = ToUnicode::parse(SAMPLE);
        assert_eq!(cmap.get(0x0000), None);
        assert_eq!(cmap.get(0xFFFF), None);
    }
}
