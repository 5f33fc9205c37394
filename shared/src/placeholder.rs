//! Placeholder syntax for passwords and its single-byte stored form.
//!
//! Text form: `{TOKEN}` marks a control action, `{{` and `}}` escape literal braces. Only a fixed
//! set of tokens can be stored on the device; each maps to one byte in `0x80..=0x8F`, a range
//! that never appears standalone in valid UTF-8.

use alloc::{format, string::String, vec::Vec};
use core::fmt::Write;

use crate::keymap;

/// First byte of the reserved placeholder range.
pub const PLACEHOLDER_FIRST: u8 = 0x80;
/// Last byte of the reserved placeholder range.
pub const PLACEHOLDER_LAST: u8 = 0x8F;

/// Whether `byte` belongs to the reserved placeholder range.
pub const fn is_placeholder_byte(byte: u8) -> bool {
    byte >= PLACEHOLDER_FIRST && byte <= PLACEHOLDER_LAST
}

/// Errors produced while tokenizing or encoding placeholder text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceholderError {
    #[error("nested '{{' at byte {position}")]
    Nested { position: usize },
    #[error("'}}' without matching '{{' at byte {position}")]
    StrayClose { position: usize },
    #[error("missing '}}' for placeholder opened at byte {position}")]
    Unterminated { position: usize },
    #[error("empty placeholder at byte {position}")]
    Empty { position: usize },
    #[error("placeholder {{{0}}} cannot be stored on the device")]
    Unstorable(String),
    #[error("character {0:?} has no key on the device layout")]
    Unmapped(char),
}

/// Placeholders the device understands in stored passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoredPlaceholder {
    Enter = 0x80,
    Tab = 0x81,
    Escape = 0x82,
    Backspace = 0x83,
    Delay500 = 0x84,
    Delay1000 = 0x85,
    CtrlAltDel = 0x86,
    ShiftTab = 0x87,
}

impl StoredPlaceholder {
    pub const ALL: [StoredPlaceholder; 8] = [
        StoredPlaceholder::Enter,
        StoredPlaceholder::Tab,
        StoredPlaceholder::Escape,
        StoredPlaceholder::Backspace,
        StoredPlaceholder::Delay500,
        StoredPlaceholder::Delay1000,
        StoredPlaceholder::CtrlAltDel,
        StoredPlaceholder::ShiftTab,
    ];

    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|placeholder| placeholder.byte() == byte)
    }

    /// Canonical token spelling used by [`decode`].
    pub const fn token(self) -> &'static str {
        match self {
            StoredPlaceholder::Enter => "ENTER",
            StoredPlaceholder::Tab => "TAB",
            StoredPlaceholder::Escape => "ESC",
            StoredPlaceholder::Backspace => "BACKSPACE",
            StoredPlaceholder::Delay500 => "DELAY:500",
            StoredPlaceholder::Delay1000 => "DELAY:1000",
            StoredPlaceholder::CtrlAltDel => "CTRL+ALT+DEL",
            StoredPlaceholder::ShiftTab => "SHIFT+TAB",
        }
    }

    /// Match a token written by a user, accepting aliases and ignoring case and spaces.
    pub fn from_token(token: &str) -> Option<Self> {
        let normalized: String = token
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_uppercase())
            .collect();
        let placeholder = match normalized.as_str() {
            "ENTER" => StoredPlaceholder::Enter,
            "TAB" => StoredPlaceholder::Tab,
            "ESC" | "ESCAPE" => StoredPlaceholder::Escape,
            "BACKSPACE" | "BKSP" => StoredPlaceholder::Backspace,
            "DELAY:500" => StoredPlaceholder::Delay500,
            "DELAY:1000" => StoredPlaceholder::Delay1000,
            "CTRL+ALT+DEL" | "CTRL+ALT+DELETE" => StoredPlaceholder::CtrlAltDel,
            "SHIFT+TAB" => StoredPlaceholder::ShiftTab,
            _ => return None,
        };
        Some(placeholder)
    }
}

/// Piece of placeholder text after brace handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Char(char),
    Token(&'a str),
}

/// Split `text` into literal characters and trimmed placeholder tokens.
///
/// Fails without partial output on nested, unbalanced or empty placeholders.
pub fn tokenize(text: &str) -> Result<Vec<Segment<'_>>, PlaceholderError> {
    let mut segments = Vec::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut open: Option<usize> = None;

    while let Some((position, ch)) = chars.next() {
        match (ch, open) {
            ('{', None) => {
                if chars.next_if(|&(_, next)| next == '{').is_some() {
                    segments.push(Segment::Char('{'));
                } else {
                    open = Some(position);
                }
            }
            ('{', Some(_)) => return Err(PlaceholderError::Nested { position }),
            ('}', Some(start)) => {
                let token = text[start + 1..position].trim();
                if token.is_empty() {
                    return Err(PlaceholderError::Empty { position: start });
                }
                segments.push(Segment::Token(token));
                open = None;
            }
            ('}', None) => {
                if chars.next_if(|&(_, next)| next == '}').is_some() {
                    segments.push(Segment::Char('}'));
                } else {
                    return Err(PlaceholderError::StrayClose { position });
                }
            }
            (_, Some(_)) => {}
            (literal, None) => segments.push(Segment::Char(literal)),
        }
    }

    if let Some(position) = open {
        return Err(PlaceholderError::Unterminated { position });
    }

    Ok(segments)
}

/// Convert placeholder text into the byte form stored inside an encrypted password.
pub fn encode(text: &str) -> Result<Vec<u8>, PlaceholderError> {
    let mut out = Vec::with_capacity(text.len());
    for segment in tokenize(text)? {
        match segment {
            Segment::Char(ch) => {
                if keymap::lookup(ch).is_none() {
                    return Err(PlaceholderError::Unmapped(ch));
                }
                let mut utf8 = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            }
            Segment::Token(token) => {
                let placeholder = StoredPlaceholder::from_token(token)
                    .ok_or_else(|| PlaceholderError::Unstorable(token.into()))?;
                out.push(placeholder.byte());
            }
        }
    }
    Ok(out)
}

/// Render stored password bytes back into placeholder text.
///
/// NUL bytes are skipped; reserved or undecodable bytes are shown as `\xNN`.
pub fn decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut offset = 0;
    while offset < bytes.len() {
        let byte = bytes[offset];
        if byte == 0 {
            offset += 1;
            continue;
        }

        if is_placeholder_byte(byte) {
            match StoredPlaceholder::from_byte(byte) {
                Some(placeholder) => {
                    out.push('{');
                    out.push_str(placeholder.token());
                    out.push('}');
                }
                None => push_hex_escape(&mut out, byte),
            }
            offset += 1;
            continue;
        }

        match next_char(&bytes[offset..]) {
            Some(('{', width)) => {
                out.push_str("{{");
                offset += width;
            }
            Some(('}', width)) => {
                out.push_str("}}");
                offset += width;
            }
            Some((ch, width)) => {
                out.push(ch);
                offset += width;
            }
            None => {
                push_hex_escape(&mut out, byte);
                offset += 1;
            }
        }
    }
    out
}

/// Decode the UTF-8 character at the start of `bytes` together with its width.
pub(crate) fn next_char(bytes: &[u8]) -> Option<(char, usize)> {
    let width = match *bytes.first()? {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let chunk = bytes.get(..width)?;
    let ch = core::str::from_utf8(chunk).ok()?.chars().next()?;
    Some((ch, width))
}

fn push_hex_escape(out: &mut String, byte: u8) {
    let _ = write!(out, "\\x{byte:02X}");
}

/// Human readable listing of the storable tokens, used by the companion help output.
pub fn storable_tokens() -> String {
    let tokens: Vec<String> = StoredPlaceholder::ALL
        .iter()
        .map(|placeholder| format!("{{{}}}", placeholder.token()))
        .collect();
    tokens.join(" ")
}
