use std::collections::VecDeque;

use shared::error::SharedError;
use shared::protocol::{Command, DEFAULT_MTU, ResponseFrame};

use super::DeviceTransport;

/// In-memory device double that replays queued responses.
#[derive(Default)]
pub struct MemoryDeviceTransport {
    responses: VecDeque<Vec<u8>>,
    pub sent_frames: Vec<Vec<u8>>,
}

impl MemoryDeviceTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&mut self, frame: ResponseFrame) {
        self.responses.push_back(frame.to_bytes(DEFAULT_MTU).to_vec());
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent_frames
            .iter()
            .map(|frame| Command::parse(frame).expect("sent frame parses"))
            .collect()
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }
}

impl DeviceTransport for MemoryDeviceTransport {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SharedError> {
        self.sent_frames.push(frame.to_vec());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, SharedError> {
        self.responses
            .pop_front()
            .ok_or_else(|| SharedError::Transport("no response queued".into()))
    }
}
