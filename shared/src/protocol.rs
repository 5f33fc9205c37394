//! User-management command protocol carried over the custom BLE characteristic.
//!
//! Every frame starts with `[opcode, index]`. Inbound frames are validated against the exact
//! length of their opcode before any field is read.

use alloc::{string::String, vec::Vec};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LEN: usize = 128;
/// Default negotiated payload size for outbound frames.
pub const DEFAULT_MTU: usize = 128;
/// Size of the `[opcode, index]` header.
pub const FRAME_HEADER_LEN: usize = 2;
pub const LABEL_LEN: usize = 32;
pub const PASSWORD_LEN: usize = 32;
/// Label, password, and the four flag bytes of a user entry.
pub const USER_PAYLOAD_LEN: usize = LABEL_LEN + PASSWORD_LEN + 4;
pub const USER_FRAME_LEN: usize = FRAME_HEADER_LEN + USER_PAYLOAD_LEN;
/// Fingerprint slot sentinel meaning "not bound to a finger".
pub const UNBOUND_FINGERPRINT: u8 = 0xFF;
pub const DB_CLEARED_TEXT: &str = "User DB cleared";

/// Errors raised while decoding or encoding protocol frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("frame length {len} exceeds limit {limit}")]
    TooLarge { len: usize, limit: usize },
    #[error("opcode 0x{opcode:02X} expects {min}..={max} bytes, got {actual}")]
    Length {
        opcode: u8,
        min: usize,
        max: usize,
        actual: usize,
    },
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    #[error("unknown response tag 0x{0:02X}")]
    UnknownTag(u8),
    #[error("invalid transport scope {0}")]
    InvalidScope(u8),
    #[error("invalid message level {0}")]
    InvalidLevel(u8),
    #[error("label is not valid UTF-8")]
    InvalidLabel,
    #[error("{field} is {len} bytes, limit is {limit}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },
}

/// Inbound command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    ResetAll = 0x00,
    AddUser = 0x01,
    EditUser = 0x02,
    RemoveUser = 0x03,
    GetUserEntry = 0x04,
    ClearDb = 0x06,
    EnrollFingerprint = 0x07,
    ClearFingerprintLibrary = 0x08,
}

impl Opcode {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::ResetAll),
            0x01 => Some(Opcode::AddUser),
            0x02 => Some(Opcode::EditUser),
            0x03 => Some(Opcode::RemoveUser),
            0x04 => Some(Opcode::GetUserEntry),
            0x06 => Some(Opcode::ClearDb),
            0x07 => Some(Opcode::EnrollFingerprint),
            0x08 => Some(Opcode::ClearFingerprintLibrary),
            _ => None,
        }
    }

    pub const fn as_wire(self) -> u8 {
        self as u8
    }

    /// Inclusive frame length bounds for the opcode.
    pub const fn frame_len(self) -> (usize, usize) {
        match self {
            Opcode::AddUser | Opcode::EditUser => (USER_FRAME_LEN, USER_FRAME_LEN),
            Opcode::RemoveUser | Opcode::GetUserEntry => (FRAME_HEADER_LEN, FRAME_HEADER_LEN),
            Opcode::ResetAll
            | Opcode::ClearDb
            | Opcode::EnrollFingerprint
            | Opcode::ClearFingerprintLibrary => (1, FRAME_HEADER_LEN),
        }
    }
}

/// Outbound frame tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseTag {
    UserEntry = 0xA1,
    AuthStatus = 0x99,
    Message = 0xAA,
    DbCleared = 0xFF,
}

impl ResponseTag {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0xA1 => Some(ResponseTag::UserEntry),
            0x99 => Some(ResponseTag::AuthStatus),
            0xAA => Some(ResponseTag::Message),
            0xFF => Some(ResponseTag::DbCleared),
            _ => None,
        }
    }

    pub const fn as_wire(self) -> u8 {
        self as u8
    }
}

/// Severity carried in the first payload byte of message frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageLevel {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl MessageLevel {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageLevel::Info),
            1 => Some(MessageLevel::Warning),
            2 => Some(MessageLevel::Error),
            _ => None,
        }
    }
}

/// HID transports a credential may be typed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransportScope {
    BluetoothOnly = 0,
    UsbOnly = 1,
    #[default]
    Either = 2,
}

impl TransportScope {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(TransportScope::BluetoothOnly),
            1 => Some(TransportScope::UsbOnly),
            2 => Some(TransportScope::Either),
            _ => None,
        }
    }

    pub const fn as_wire(self) -> u8 {
        self as u8
    }
}

/// Label, password, and flags exchanged by AddUser, EditUser, and user-entry pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub label: String,
    /// Stored password bytes (placeholders already encoded).
    pub password: Zeroizing<Vec<u8>>,
    pub requires_os_unlock: bool,
    pub auto_bind: bool,
    pub fingerprint_id: Option<u8>,
    pub transport_scope: TransportScope,
}

impl UserEntry {
    /// Decode the fixed 68-byte user payload.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() != USER_PAYLOAD_LEN {
            return Err(FrameError::Length {
                opcode: Opcode::AddUser.as_wire(),
                min: USER_FRAME_LEN,
                max: USER_FRAME_LEN,
                actual: payload.len() + FRAME_HEADER_LEN,
            });
        }

        let (label, rest) = payload.split_at(LABEL_LEN);
        let (password, flags) = rest.split_at(PASSWORD_LEN);

        let label = core::str::from_utf8(trim_nul(label))
            .map_err(|_| FrameError::InvalidLabel)?
            .into();
        let password = Zeroizing::new(trim_nul(password).to_vec());
        let transport_scope =
            TransportScope::from_wire(flags[3]).ok_or(FrameError::InvalidScope(flags[3]))?;
        let fingerprint_id = match flags[2] {
            UNBOUND_FINGERPRINT => None,
            slot => Some(slot),
        };

        Ok(Self {
            label,
            password,
            requires_os_unlock: flags[0] != 0,
            auto_bind: flags[1] != 0,
            fingerprint_id,
            transport_scope,
        })
    }

    /// Append the fixed-width payload to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), FrameError> {
        check_field("label", self.label.len(), LABEL_LEN)?;
        check_field("password", self.password.len(), PASSWORD_LEN)?;

        push_padded(out, self.label.as_bytes(), LABEL_LEN);
        push_padded(out, &self.password, PASSWORD_LEN);
        out.push(u8::from(self.requires_os_unlock));
        out.push(u8::from(self.auto_bind));
        out.push(self.fingerprint_id.unwrap_or(UNBOUND_FINGERPRINT));
        out.push(self.transport_scope.as_wire());
        Ok(())
    }
}

/// Parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ResetAll,
    AddUser(UserEntry),
    EditUser { index: u8, entry: UserEntry },
    RemoveUser { index: u8 },
    GetUserEntry { index: u8 },
    ClearDb,
    EnrollFingerprint,
    ClearFingerprintLibrary,
}

impl Command {
    /// Validate the frame length for its opcode, then decode the fields.
    pub fn parse(frame: &[u8]) -> Result<Self, FrameError> {
        let Some(&code) = frame.first() else {
            return Err(FrameError::Empty);
        };
        if frame.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge {
                len: frame.len(),
                limit: MAX_FRAME_LEN,
            });
        }

        let opcode = Opcode::from_wire(code).ok_or(FrameError::UnknownOpcode(code))?;
        let (min, max) = opcode.frame_len();
        if frame.len() < min || frame.len() > max {
            return Err(FrameError::Length {
                opcode: code,
                min,
                max,
                actual: frame.len(),
            });
        }

        let index = frame.get(1).copied().unwrap_or(0);
        let command = match opcode {
            Opcode::ResetAll => Command::ResetAll,
            Opcode::AddUser => Command::AddUser(UserEntry::decode(&frame[FRAME_HEADER_LEN..])?),
            Opcode::EditUser => Command::EditUser {
                index,
                entry: UserEntry::decode(&frame[FRAME_HEADER_LEN..])?,
            },
            Opcode::RemoveUser => Command::RemoveUser { index },
            Opcode::GetUserEntry => Command::GetUserEntry { index },
            Opcode::ClearDb => Command::ClearDb,
            Opcode::EnrollFingerprint => Command::EnrollFingerprint,
            Opcode::ClearFingerprintLibrary => Command::ClearFingerprintLibrary,
        };
        Ok(command)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Command::ResetAll => Opcode::ResetAll,
            Command::AddUser(_) => Opcode::AddUser,
            Command::EditUser { .. } => Opcode::EditUser,
            Command::RemoveUser { .. } => Opcode::RemoveUser,
            Command::GetUserEntry { .. } => Opcode::GetUserEntry,
            Command::ClearDb => Opcode::ClearDb,
            Command::EnrollFingerprint => Opcode::EnrollFingerprint,
            Command::ClearFingerprintLibrary => Opcode::ClearFingerprintLibrary,
        }
    }

    /// Encode the command as the companion sends it.
    pub fn encode(&self) -> Result<Zeroizing<Vec<u8>>, FrameError> {
        let mut frame = Zeroizing::new(Vec::with_capacity(USER_FRAME_LEN));
        frame.push(self.opcode().as_wire());
        match self {
            Command::AddUser(entry) => {
                frame.push(0);
                entry.encode_into(&mut frame)?;
            }
            Command::EditUser { index, entry } => {
                frame.push(*index);
                entry.encode_into(&mut frame)?;
            }
            Command::RemoveUser { index } | Command::GetUserEntry { index } => frame.push(*index),
            Command::ResetAll
            | Command::ClearDb
            | Command::EnrollFingerprint
            | Command::ClearFingerprintLibrary => frame.push(0),
        }
        Ok(frame)
    }
}

/// Outbound `{tag, index, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub tag: ResponseTag,
    pub index: u8,
    pub payload: Zeroizing<Vec<u8>>,
}

impl ResponseFrame {
    pub fn new(tag: ResponseTag, index: u8, payload: Vec<u8>) -> Self {
        Self {
            tag,
            index,
            payload: Zeroizing::new(payload),
        }
    }

    pub fn user_entry(index: u8, entry: &UserEntry) -> Result<Self, FrameError> {
        let mut payload = Vec::with_capacity(USER_PAYLOAD_LEN);
        entry.encode_into(&mut payload)?;
        Ok(Self::new(ResponseTag::UserEntry, index, payload))
    }

    /// User-entry push with no payload, sent once the requested index is past the end.
    pub fn end_of_list(index: u8) -> Self {
        Self::new(ResponseTag::UserEntry, index, Vec::new())
    }

    pub fn auth_status(unlocked: bool) -> Self {
        Self::new(ResponseTag::AuthStatus, 0, alloc::vec![u8::from(unlocked)])
    }

    pub fn message(level: MessageLevel, text: &str) -> Self {
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.push(level as u8);
        payload.extend_from_slice(text.as_bytes());
        Self::new(ResponseTag::Message, 0, payload)
    }

    pub fn db_cleared() -> Self {
        Self::new(ResponseTag::DbCleared, 0, DB_CLEARED_TEXT.as_bytes().to_vec())
    }

    /// Serialize the frame, truncating the payload to fit `mtu`.
    pub fn to_bytes(&self, mtu: usize) -> Zeroizing<Vec<u8>> {
        let limit = mtu.clamp(FRAME_HEADER_LEN, MAX_FRAME_LEN) - FRAME_HEADER_LEN;
        let payload = &self.payload[..self.payload.len().min(limit)];
        let mut out = Zeroizing::new(Vec::with_capacity(FRAME_HEADER_LEN + payload.len()));
        out.push(self.tag.as_wire());
        out.push(self.index);
        out.extend_from_slice(payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Empty);
        }
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge {
                len: bytes.len(),
                limit: MAX_FRAME_LEN,
            });
        }
        let tag = ResponseTag::from_wire(bytes[0]).ok_or(FrameError::UnknownTag(bytes[0]))?;
        Ok(Self::new(tag, bytes[1], bytes[FRAME_HEADER_LEN..].to_vec()))
    }

    /// Interpret the payload according to its tag.
    pub fn event(&self) -> Result<DeviceEvent, FrameError> {
        let event = match self.tag {
            ResponseTag::UserEntry if self.payload.is_empty() => {
                DeviceEvent::EndOfList { index: self.index }
            }
            ResponseTag::UserEntry => DeviceEvent::UserEntry {
                index: self.index,
                entry: UserEntry::decode(&self.payload)?,
            },
            ResponseTag::AuthStatus => {
                DeviceEvent::AuthStatus(self.payload.first().copied().unwrap_or(0) != 0)
            }
            ResponseTag::Message => {
                let (&level, text) = self.payload.split_first().ok_or(FrameError::Empty)?;
                DeviceEvent::Message {
                    level: MessageLevel::from_wire(level).ok_or(FrameError::InvalidLevel(level))?,
                    text: String::from_utf8_lossy(text).into_owned(),
                }
            }
            ResponseTag::DbCleared => {
                DeviceEvent::DbCleared(String::from_utf8_lossy(&self.payload).into_owned())
            }
        };
        Ok(event)
    }
}

/// Decoded view of a device response, used by the companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    UserEntry { index: u8, entry: UserEntry },
    EndOfList { index: u8 },
    AuthStatus(bool),
    Message { level: MessageLevel, text: String },
    DbCleared(String),
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

fn push_padded(out: &mut Vec<u8>, bytes: &[u8], width: usize) {
    out.extend_from_slice(bytes);
    out.resize(out.len() + (width - bytes.len()), 0);
}

fn check_field(field: &'static str, len: usize, limit: usize) -> Result<(), FrameError> {
    if len > limit {
        return Err(FrameError::FieldTooLong { field, len, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> UserEntry {
        UserEntry {
            label: "mail".into(),
            password: Zeroizing::new(b"hunter2\x80".to_vec()),
            requires_os_unlock: true,
            auto_bind: false,
            fingerprint_id: Some(3),
            transport_scope: TransportScope::UsbOnly,
        }
    }

    #[test]
    fn add_user_frame_has_fixed_layout() {
        let frame = Command::AddUser(sample_entry()).encode().unwrap();
        assert_eq!(frame.len(), USER_FRAME_LEN);
        assert_eq!(&frame[..2], &[0x01, 0x00]);
        assert_eq!(&frame[2..6], b"mail");
        assert_eq!(frame[6], 0);
        assert_eq!(&frame[34..42], b"hunter2\x80");
        assert_eq!(&frame[66..], &[1, 0, 3, 1]);

        let parsed = Command::parse(&frame).unwrap();
        assert_eq!(parsed, Command::AddUser(sample_entry()));
    }

    #[test]
    fn short_and_long_frames_are_rejected() {
        let frame = Command::AddUser(sample_entry()).encode().unwrap();
        assert_eq!(
            Command::parse(&frame[..69]),
            Err(FrameError::Length {
                opcode: 0x01,
                min: 70,
                max: 70,
                actual: 69
            })
        );

        let mut long = frame.to_vec();
        long.push(0);
        assert!(matches!(
            Command::parse(&long),
            Err(FrameError::Length { actual: 71, .. })
        ));

        assert_eq!(
            Command::parse(&[0x03]),
            Err(FrameError::Length {
                opcode: 0x03,
                min: 2,
                max: 2,
                actual: 1
            })
        );
        assert_eq!(
            Command::parse(&[0u8; 129]),
            Err(FrameError::TooLarge {
                len: 129,
                limit: 128
            })
        );
        assert_eq!(Command::parse(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn index_less_commands_accept_one_or_two_bytes() {
        assert_eq!(Command::parse(&[0x07]), Ok(Command::EnrollFingerprint));
        assert_eq!(Command::parse(&[0x06, 0x09]), Ok(Command::ClearDb));
        assert_eq!(
            Command::parse(&[0x04, 0x02]),
            Ok(Command::GetUserEntry { index: 2 })
        );
        assert_eq!(Command::parse(&[0x05, 0]), Err(FrameError::UnknownOpcode(0x05)));
    }

    #[test]
    fn invalid_scope_and_label_are_reported() {
        let mut frame = Command::AddUser(sample_entry()).encode().unwrap().to_vec();
        frame[69] = 7;
        assert_eq!(Command::parse(&frame), Err(FrameError::InvalidScope(7)));

        frame[69] = 2;
        frame[2] = 0xFF;
        assert_eq!(Command::parse(&frame), Err(FrameError::InvalidLabel));
    }

    #[test]
    fn oversized_fields_cannot_be_encoded() {
        let mut entry = sample_entry();
        entry.label = "x".repeat(33);
        assert_eq!(
            Command::AddUser(entry).encode(),
            Err(FrameError::FieldTooLong {
                field: "label",
                len: 33,
                limit: 32
            })
        );
    }

    #[test]
    fn response_payload_is_capped_to_mtu() {
        let frame = ResponseFrame::user_entry(4, &sample_entry()).unwrap();
        assert_eq!(frame.to_bytes(DEFAULT_MTU).len(), USER_FRAME_LEN);
        let small = frame.to_bytes(23);
        assert_eq!(small.len(), 23);
        assert_eq!(&small[..2], &[0xA1, 4]);
    }

    #[test]
    fn response_events_decode() {
        let bytes = ResponseFrame::message(MessageLevel::Error, "Vault full").to_bytes(DEFAULT_MTU);
        assert_eq!(&bytes[..3], &[0xAA, 0, 2]);
        assert_eq!(
            ResponseFrame::decode(&bytes).unwrap().event().unwrap(),
            DeviceEvent::Message {
                level: MessageLevel::Error,
                text: "Vault full".into()
            }
        );

        let status = ResponseFrame::auth_status(true).to_bytes(DEFAULT_MTU);
        assert_eq!(status.as_slice(), &[0x99, 0, 1]);

        let end = ResponseFrame::end_of_list(5).to_bytes(DEFAULT_MTU);
        assert_eq!(
            ResponseFrame::decode(&end).unwrap().event().unwrap(),
            DeviceEvent::EndOfList { index: 5 }
        );

        let entry = ResponseFrame::user_entry(1, &sample_entry())
            .unwrap()
            .to_bytes(DEFAULT_MTU);
        assert_eq!(
            ResponseFrame::decode(&entry).unwrap().event().unwrap(),
            DeviceEvent::UserEntry {
                index: 1,
                entry: sample_entry()
            }
        );
    }
}
