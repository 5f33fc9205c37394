use crate::keys::KeyCodecError;
use crate::link::LinkError;
use crate::placeholder::PlaceholderError;
use crate::protocol::FrameError;
use alloc::string::String;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("placeholder error: {0}")]
    Placeholder(#[from] PlaceholderError),
    #[error("key codec error: {0}")]
    KeyCodec(#[from] KeyCodecError),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<io::Error> for SharedError {
    fn from(value: io::Error) -> Self {
        SharedError::Transport(value.to_string())
    }
}
