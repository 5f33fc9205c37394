//! Italian keyboard layout used when typing credentials into a host.
//!
//! The device always types with the Italian layout, so both the firmware transmitter and the
//! companion preview resolve characters through this table.

/// Modifier bits of a boot keyboard report.
pub mod modifier {
    pub const NONE: u8 = 0x00;
    pub const LEFT_CTRL: u8 = 0x01;
    pub const LEFT_SHIFT: u8 = 0x02;
    pub const LEFT_ALT: u8 = 0x04;
    pub const LEFT_GUI: u8 = 0x08;
    pub const RIGHT_CTRL: u8 = 0x10;
    pub const RIGHT_SHIFT: u8 = 0x20;
    pub const RIGHT_ALT: u8 = 0x40;
}

/// HID keyboard usage identifiers referenced by the layout tables.
pub mod key {
    pub const A: u8 = 0x04;
    pub const DIGIT_1: u8 = 0x1E;
    pub const DIGIT_0: u8 = 0x27;
    pub const ENTER: u8 = 0x28;
    pub const ESCAPE: u8 = 0x29;
    pub const BACKSPACE: u8 = 0x2A;
    pub const TAB: u8 = 0x2B;
    pub const SPACE: u8 = 0x2C;
    pub const MINUS: u8 = 0x2D;
    pub const EQUAL: u8 = 0x2E;
    pub const BRACKET_LEFT: u8 = 0x2F;
    pub const BRACKET_RIGHT: u8 = 0x30;
    pub const BACKSLASH: u8 = 0x31;
    pub const SEMICOLON: u8 = 0x33;
    pub const APOSTROPHE: u8 = 0x34;
    pub const GRAVE: u8 = 0x35;
    pub const COMMA: u8 = 0x36;
    pub const PERIOD: u8 = 0x37;
    pub const SLASH: u8 = 0x38;
    pub const F1: u8 = 0x3A;
    pub const DELETE: u8 = 0x4C;
    pub const EUROPE_2: u8 = 0x64;
}

use key::*;
use modifier::*;

/// Modifier and usage pair required to type a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub modifiers: u8,
    pub keycode: u8,
}

impl KeyStroke {
    pub const fn new(modifiers: u8, keycode: u8) -> Self {
        Self { modifiers, keycode }
    }
}

const fn plain(keycode: u8) -> KeyStroke {
    KeyStroke::new(NONE, keycode)
}

const fn shifted(keycode: u8) -> KeyStroke {
    KeyStroke::new(LEFT_SHIFT, keycode)
}

const fn alt_gr(keycode: u8) -> KeyStroke {
    KeyStroke::new(RIGHT_ALT, keycode)
}

/// Resolve the keystroke for `ch`, returning `None` when the layout cannot type it.
pub fn lookup(ch: char) -> Option<KeyStroke> {
    if ch.is_ascii() {
        ascii(ch as u8)
    } else {
        accented(ch)
    }
}

fn ascii(byte: u8) -> Option<KeyStroke> {
    let stroke = match byte {
        b'a'..=b'z' => plain(A + (byte - b'a')),
        b'A'..=b'Z' => shifted(A + (byte - b'A')),
        b'1'..=b'9' => plain(DIGIT_1 + (byte - b'1')),
        b'0' => plain(DIGIT_0),
        0x08 => plain(BACKSPACE),
        b'\t' => plain(TAB),
        b'\n' | b'\r' => plain(ENTER),
        0x1B => plain(ESCAPE),
        0x7F => plain(DELETE),
        b' ' => plain(SPACE),
        b'!' => shifted(DIGIT_1),
        b'"' => shifted(DIGIT_1 + 1),
        b'#' => alt_gr(APOSTROPHE),
        b'$' => shifted(DIGIT_1 + 3),
        b'%' => shifted(DIGIT_1 + 4),
        b'&' => shifted(DIGIT_1 + 5),
        b'\'' => plain(MINUS),
        b'(' => shifted(DIGIT_1 + 7),
        b')' => shifted(DIGIT_1 + 8),
        b'*' => shifted(BRACKET_RIGHT),
        b'+' => plain(BRACKET_RIGHT),
        b',' => plain(COMMA),
        b'-' => plain(SLASH),
        b'.' => plain(PERIOD),
        b'/' => shifted(DIGIT_1 + 6),
        b':' => shifted(PERIOD),
        b';' => shifted(COMMA),
        b'<' => plain(EUROPE_2),
        b'=' => shifted(DIGIT_0),
        b'>' => shifted(EUROPE_2),
        b'?' => shifted(MINUS),
        b'@' => alt_gr(SEMICOLON),
        b'[' => alt_gr(BRACKET_LEFT),
        b'\\' => plain(GRAVE),
        b']' => alt_gr(BRACKET_RIGHT),
        b'^' => shifted(EQUAL),
        b'_' => shifted(SLASH),
        b'`' => plain(GRAVE),
        b'{' => KeyStroke::new(LEFT_CTRL | LEFT_ALT | RIGHT_SHIFT, BRACKET_LEFT),
        b'|' => shifted(GRAVE),
        b'}' => KeyStroke::new(LEFT_CTRL | LEFT_ALT | RIGHT_SHIFT, BRACKET_RIGHT),
        b'~' => shifted(GRAVE),
        _ => return None,
    };
    Some(stroke)
}

fn accented(ch: char) -> Option<KeyStroke> {
    let stroke = match ch {
        'à' => plain(APOSTROPHE),
        'è' => plain(BRACKET_LEFT),
        'é' => shifted(BRACKET_LEFT),
        'ì' => plain(EQUAL),
        'ò' => plain(SEMICOLON),
        'ù' => plain(BACKSLASH),
        '€' => alt_gr(0x08),
        '£' => shifted(DIGIT_1 + 2),
        'ç' => shifted(SEMICOLON),
        '§' => shifted(BACKSLASH),
        '°' => shifted(APOSTROPHE),
        _ => return None,
    };
    Some(stroke)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_follow_usage_order() {
        assert_eq!(lookup('a'), Some(KeyStroke::new(NONE, 0x04)));
        assert_eq!(lookup('z'), Some(KeyStroke::new(NONE, 0x1D)));
        assert_eq!(lookup('Q'), Some(KeyStroke::new(LEFT_SHIFT, 0x14)));
    }

    #[test]
    fn italian_symbols_use_alt_gr() {
        assert_eq!(lookup('@'), Some(KeyStroke::new(RIGHT_ALT, 0x33)));
        assert_eq!(lookup('#'), Some(KeyStroke::new(RIGHT_ALT, 0x34)));
        assert_eq!(lookup('-'), Some(KeyStroke::new(NONE, 0x38)));
        assert_eq!(lookup('/'), Some(KeyStroke::new(LEFT_SHIFT, 0x24)));
    }

    #[test]
    fn accents_map_to_dedicated_keys() {
        assert_eq!(lookup('à'), Some(KeyStroke::new(NONE, 0x34)));
        assert_eq!(lookup('é'), Some(KeyStroke::new(LEFT_SHIFT, 0x2F)));
        assert_eq!(lookup('€'), Some(KeyStroke::new(RIGHT_ALT, 0x08)));
    }

    #[test]
    fn unmapped_characters_are_rejected() {
        assert_eq!(lookup('ß'), None);
        assert_eq!(lookup('\u{0}'), None);
        assert_eq!(lookup('\u{7}'), None);
    }
}
