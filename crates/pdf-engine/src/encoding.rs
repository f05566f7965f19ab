//! WinAnsiEncoding (Windows-1252 as used by PDF simple fonts).

/// Characters at byte positions 0x80..=0x9F. `None` marks unassigned slots.
const HIGH_SPECIALS: [Option<char>; 32] = [
    Some('€'), None, Some('‚'), Some('ƒ'), Some('„'), Some('…'), Some('†'), Some('‡'),
    Some('ˆ'), Some('‰'), Some('Š'), Some('‹'), Some('Œ'), None, Some('Ž'), None,
    None, Some('‘'), Some('’'), Some('“'), Some('”'), Some('•'), Some('–'), Some('—'),
    Some('˜'), Some('™'), Some('š'), Some('›'), Some('œ'), None, Some('ž'), Some('Ÿ'),
];

pub fn win_ansi_decode(byte: u8) -> char {
    match byte {
        0x80..=0x9F => HIGH_SPECIALS[usize::from(byte - 0x80)].unwrap_or(char::from(byte)),
        _ => char::from(byte),
    }
}

/// Byte for `ch`, if the character is drawable with a WinAnsi-encoded font.
pub fn win_ansi_encode(ch: char) -> Option<u8> {
    match ch as u32 {
        0x20..=0x7E | 0xA0..=0xFF => u8::try_from(ch as u32).ok(),
        _ => HIGH_SPECIALS
            .iter()
            .position(|special| *special == Some(ch))
            .and_then(|index| u8::try_from(0x80 + index).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specials_map_both_ways() {
        assert_eq!(win_ansi_encode('€'), Some(0x80));
        assert_eq!(win_ansi_encode('—'), Some(0x97));
        assert_eq!(win_ansi_decode(0x93), '“');
        assert_eq!(win_ansi_encode('é'), Some(0xE9));
        assert_eq!(win_ansi_decode(0xE9), 'é');
    }

    #[test]
    fn cjk_and_controls_are_not_encodable() {
        assert_eq!(win_ansi_encode('身'), None);
        assert_eq!(win_ansi_encode('\u{7}'), None);
        assert_eq!(win_ansi_encode('\u{81}'), None);
    }
}
