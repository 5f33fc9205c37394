//! Serial link envelope used to carry protocol frames over the USB cable.
//!
//! Layout: `[LINK_MAGIC][len][frame; len][crc32 LE]`.

use alloc::vec::Vec;
use crc32fast::Hasher;
use zeroize::Zeroize;

use crate::protocol::MAX_FRAME_LEN;

pub const LINK_MAGIC: u8 = 0xFB;
/// Magic, length, and checksum bytes around each frame.
pub const LINK_OVERHEAD: usize = 1 + 1 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("expected link magic 0xFB, got 0x{0:02X}")]
    BadMagic(u8),
    #[error("link frame of {0} bytes exceeds the protocol limit")]
    TooLarge(usize),
    #[error("checksum mismatch (expected 0x{expected:08X}, calculated 0x{actual:08X})")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Wrap a protocol frame for transmission over the serial link.
pub fn encode_link_frame(frame: &[u8]) -> Result<Vec<u8>, LinkError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(LinkError::TooLarge(frame.len()));
    }
    let mut out = Vec::with_capacity(frame.len() + LINK_OVERHEAD);
    out.push(LINK_MAGIC);
    out.push(frame.len() as u8);
    out.extend_from_slice(frame);
    out.extend_from_slice(&compute_crc32(frame).to_le_bytes());
    Ok(out)
}

/// Byte-at-a-time reassembly of link frames.
#[derive(Debug, Default)]
pub struct LinkAssembler {
    buffer: Vec<u8>,
}

impl LinkAssembler {
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed one byte, returning a complete frame or an error once one is available.
    ///
    /// The assembler resynchronizes on the next magic byte after an error.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>, LinkError>> {
        if self.buffer.is_empty() && byte != LINK_MAGIC {
            return Some(Err(LinkError::BadMagic(byte)));
        }
        self.buffer.push(byte);

        let declared = *self.buffer.get(1)? as usize;
        if declared > MAX_FRAME_LEN {
            self.reset();
            return Some(Err(LinkError::TooLarge(declared)));
        }
        if self.buffer.len() < declared + LINK_OVERHEAD {
            return None;
        }

        let frame_end = 2 + declared;
        let frame = self.buffer[2..frame_end].to_vec();
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&self.buffer[frame_end..frame_end + 4]);
        self.reset();

        let expected = u32::from_le_bytes(checksum);
        let actual = compute_crc32(&frame);
        if expected != actual {
            return Some(Err(LinkError::ChecksumMismatch { expected, actual }));
        }
        Some(Ok(frame))
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.buffer.zeroize();
    }

    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut LinkAssembler, bytes: &[u8]) -> Vec<Result<Vec<u8>, LinkError>> {
        bytes
            .iter()
            .filter_map(|&byte| assembler.push(byte))
            .collect()
    }

    #[test]
    fn reassembles_frames_split_across_reads() {
        let encoded = encode_link_frame(&[0x04, 0x01]).unwrap();
        let mut assembler = LinkAssembler::new();
        assert!(feed(&mut assembler, &encoded[..3]).is_empty());
        assert_eq!(
            feed(&mut assembler, &encoded[3..]),
            vec![Ok(vec![0x04, 0x01])]
        );
        assert!(assembler.is_idle());
    }

    #[test]
    fn corrupted_checksum_is_reported_and_stream_recovers() {
        let mut encoded = encode_link_frame(&[0x07]).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        encoded.extend(encode_link_frame(&[0x06]).unwrap());

        let results = feed(&mut LinkAssembler::new(), &encoded);
        assert!(matches!(
            results[0],
            Err(LinkError::ChecksumMismatch { .. })
        ));
        assert_eq!(results[1], Ok(vec![0x06]));
    }

    #[test]
    fn noise_before_magic_is_rejected() {
        let results = feed(&mut LinkAssembler::new(), &[0x00, LINK_MAGIC, 0xF0]);
        assert_eq!(
            results,
            vec![Err(LinkError::BadMagic(0x00)), Err(LinkError::TooLarge(0xF0))]
        );
    }

    #[test]
    fn reset_discards_a_partial_frame() {
        let encoded = encode_link_frame(&[0x04, 0x02]).unwrap();
        let mut assembler = LinkAssembler::new();
        assert!(feed(&mut assembler, &encoded[..4]).is_empty());
        assert!(!assembler.is_idle());

        assembler.reset();

        assert!(assembler.is_idle());
        assert_eq!(feed(&mut assembler, &encoded), vec![Ok(vec![0x04, 0x02])]);
    }
}
