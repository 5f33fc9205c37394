//! Conversion of placeholder text and stored password bytes into keyboard actions.

use alloc::{string::String, vec::Vec};

use zeroize::Zeroize;

use crate::keymap::{self, KeyStroke, key, modifier};
use crate::placeholder::{self, PlaceholderError, Segment, StoredPlaceholder};

/// Upper bound accepted by `{DELAY:n}`.
pub const MAX_DELAY_MS: u32 = u16::MAX as u32;

/// One keyboard event (or pause) in an injection sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Zeroize)]
pub struct KeyAction {
    pub modifiers: u8,
    pub keycode: u8,
    pub delay_ms: u16,
    pub is_raw: bool,
}

impl KeyAction {
    pub const fn key(modifiers: u8, keycode: u8) -> Self {
        Self {
            modifiers,
            keycode,
            delay_ms: 0,
            is_raw: false,
        }
    }

    pub const fn delay(delay_ms: u16) -> Self {
        Self {
            modifiers: 0,
            keycode: 0,
            delay_ms,
            is_raw: false,
        }
    }

    pub const fn raw(keycode: u8) -> Self {
        Self {
            modifiers: 0,
            keycode,
            delay_ms: 0,
            is_raw: true,
        }
    }

    /// Delay actions turn into a wait instead of a report.
    pub const fn is_delay(&self) -> bool {
        self.delay_ms > 0 && self.keycode == 0 && self.modifiers == 0 && !self.is_raw
    }
}

impl From<KeyStroke> for KeyAction {
    fn from(stroke: KeyStroke) -> Self {
        KeyAction::key(stroke.modifiers, stroke.keycode)
    }
}

/// Combination typed ahead of credentials that unlock an operating system session.
pub const OS_UNLOCK: KeyAction =
    KeyAction::key(modifier::LEFT_CTRL | modifier::LEFT_ALT, key::DELETE);

/// Errors produced while turning text or stored bytes into key actions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyCodecError {
    #[error(transparent)]
    Placeholder(#[from] PlaceholderError),
    #[error("character {0:?} has no key on the device layout")]
    Unmapped(char),
    #[error("unrecognized placeholder token {0:?}")]
    UnknownToken(String),
    #[error("invalid delay placeholder {0:?}")]
    InvalidDelay(String),
    #[error("invalid raw keycode placeholder {0:?}")]
    InvalidRaw(String),
    #[error("main key must be the last element of {0:?}")]
    MainKeyNotLast(String),
    #[error("stored password contains invalid UTF-8 at byte {0}")]
    InvalidUtf8(usize),
}

impl StoredPlaceholder {
    /// Key action emitted when the placeholder is typed.
    pub const fn action(self) -> KeyAction {
        match self {
            StoredPlaceholder::Enter => KeyAction::key(modifier::NONE, key::ENTER),
            StoredPlaceholder::Tab => KeyAction::key(modifier::NONE, key::TAB),
            StoredPlaceholder::Escape => KeyAction::key(modifier::NONE, key::ESCAPE),
            StoredPlaceholder::Backspace => KeyAction::key(modifier::NONE, key::BACKSPACE),
            StoredPlaceholder::Delay500 => KeyAction::delay(500),
            StoredPlaceholder::Delay1000 => KeyAction::delay(1000),
            StoredPlaceholder::CtrlAltDel => OS_UNLOCK,
            StoredPlaceholder::ShiftTab => KeyAction::key(modifier::LEFT_SHIFT, key::TAB),
        }
    }
}

/// Parse placeholder text, including combos, delays and raw keycodes, into key actions.
pub fn parse(text: &str) -> Result<Vec<KeyAction>, KeyCodecError> {
    let mut actions = Vec::with_capacity(text.len());
    for segment in placeholder::tokenize(text)? {
        let action = match segment {
            Segment::Char(ch) => char_action(ch)?,
            Segment::Token(token) => parse_token(token)?,
        };
        actions.push(action);
    }
    Ok(actions)
}

/// Turn the decrypted stored bytes of a password into the actions the device types.
///
/// Typing stops at the first NUL. Reserved placeholder bytes without a defined action are
/// skipped.
pub fn actions_from_stored(bytes: &[u8]) -> Result<Vec<KeyAction>, KeyCodecError> {
    let mut actions = Vec::with_capacity(bytes.len());
    let mut offset = 0;
    while offset < bytes.len() {
        let byte = bytes[offset];
        if byte == 0 {
            break;
        }
        if placeholder::is_placeholder_byte(byte) {
            if let Some(stored) = StoredPlaceholder::from_byte(byte) {
                actions.push(stored.action());
            }
            offset += 1;
            continue;
        }

        let (ch, width) =
            placeholder::next_char(&bytes[offset..]).ok_or(KeyCodecError::InvalidUtf8(offset))?;
        actions.push(char_action(ch)?);
        offset += width;
    }
    Ok(actions)
}

fn char_action(ch: char) -> Result<KeyAction, KeyCodecError> {
    keymap::lookup(ch)
        .map(KeyAction::from)
        .ok_or(KeyCodecError::Unmapped(ch))
}

fn parse_token(token: &str) -> Result<KeyAction, KeyCodecError> {
    let upper = token.to_ascii_uppercase();

    if let Some(value) = upper.strip_prefix("DELAY:") {
        let delay = value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|ms| (1..=MAX_DELAY_MS).contains(ms))
            .ok_or_else(|| KeyCodecError::InvalidDelay(token.into()))?;
        return Ok(KeyAction::delay(delay as u16));
    }

    if let Some(value) = upper.strip_prefix("RAW:") {
        let value = value.trim();
        let parsed = match value.strip_prefix("0X") {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => value.parse::<u8>(),
        };
        return parsed
            .map(KeyAction::raw)
            .map_err(|_| KeyCodecError::InvalidRaw(token.into()));
    }

    let parts: Vec<&str> = upper.split('+').map(str::trim).collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(KeyCodecError::UnknownToken(token.into()));
    }

    let mut modifiers = 0u8;
    let mut keycode = 0u8;
    let last = parts.len() - 1;
    for (position, part) in parts.iter().enumerate() {
        if let Some(bits) = modifier_bits(part) {
            modifiers |= bits;
            continue;
        }
        let code = named_key(part).ok_or_else(|| KeyCodecError::UnknownToken(token.into()))?;
        if position != last {
            return Err(KeyCodecError::MainKeyNotLast(token.into()));
        }
        keycode = code;
    }

    Ok(KeyAction::key(modifiers, keycode))
}

fn modifier_bits(name: &str) -> Option<u8> {
    match name {
        "CTRL" => Some(modifier::LEFT_CTRL),
        "SHIFT" => Some(modifier::LEFT_SHIFT),
        "ALT" => Some(modifier::LEFT_ALT),
        "GUI" | "WIN" => Some(modifier::LEFT_GUI),
        _ => None,
    }
}

fn named_key(name: &str) -> Option<u8> {
    let code = match name {
        "ENTER" => key::ENTER,
        "TAB" => key::TAB,
        "ESC" | "ESCAPE" => key::ESCAPE,
        "BKSP" | "BACKSPACE" => key::BACKSPACE,
        "DEL" | "DELETE" => key::DELETE,
        "SPACE" => key::SPACE,
        _ => {
            if let Some(number) = name.strip_prefix('F').filter(|number| !number.is_empty()) {
                return number
                    .parse::<u8>()
                    .ok()
                    .filter(|n| (1..=12).contains(n))
                    .map(|n| key::F1 + n - 1);
            }
            let mut chars = name.chars();
            return match (chars.next(), chars.next()) {
                (Some(letter @ 'A'..='Z'), None) => Some(key::A + (letter as u8 - b'A')),
                _ => None,
            };
        }
    };
    Some(code)
}
