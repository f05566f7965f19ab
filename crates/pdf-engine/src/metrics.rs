/// Helvetica advance widths (AFM, thousandths of an em) for U+0020..=U+007E.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667,
    611, 722, 667, 944, 667, 667, 611, // 'A'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500,
    278, 556, 500, 722, 500, 500, 500, // 'a'..'z'
    334, 260, 334, 584, // '{'..'~'
];

const DEFAULT_WIDTH: f32 = 556.0;
const WIDE_WIDTH: f32 = 1000.0;

/// Advance width used for fonts that carry no width table. Wide (CJK and full-width) characters
/// get a full em.
pub fn helvetica_width(ch: char) -> f32 {
    let code = ch as u32;
    if (0x20..=0x7E).contains(&code) {
        return f32::from(HELVETICA_ASCII[(code - 0x20) as usize]);
    }
    if is_wide(ch) {
        WIDE_WIDTH
    } else {
        DEFAULT_WIDTH
    }
}

/// East Asian wide and full-width ranges.
pub fn is_wide(ch: char) -> bool {
    matches!(ch as u32,
        0x1100..=0x115F
        | 0x2E80..=0x303E
        | 0x3040..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x3FFFD)
}
