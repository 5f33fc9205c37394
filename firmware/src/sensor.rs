//! UART packet driver for the optical fingerprint module (R503 / KW111 command set).
//!
//! Packet layout: `EF 01 | address u32 | pid | len u16 | payload | checksum u16`, big endian.
//! `len` counts the payload plus the checksum; the checksum is the wrapping sum of `pid`, both
//! `len` bytes and the payload.

use alloc::vec::Vec;

use embassy_time::{Duration, with_timeout};
use embedded_io_async::{Read, Write};

use crate::biometric::{Capture, FingerprintSensor, Match, SensorError};

pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;
pub const DEFAULT_CAPACITY: u16 = 200;
const START_CODE: [u8; 2] = [0xEF, 0x01];
const HEADER_LEN: usize = 9;
const MAX_PAYLOAD_LEN: usize = 256;
const RESPONSE_TIMEOUT_MS: u64 = 1_000;

const PID_COMMAND: u8 = 0x01;
const PID_ACK: u8 = 0x07;

mod instruction {
    pub const GET_IMAGE: u8 = 0x01;
    pub const IMAGE_TO_TZ: u8 = 0x02;
    pub const SEARCH: u8 = 0x04;
    pub const REG_MODEL: u8 = 0x05;
    pub const STORE: u8 = 0x06;
    pub const EMPTY: u8 = 0x0D;
    pub const TEMPLATE_COUNT: u8 = 0x1D;
}

mod code {
    pub const OK: u8 = 0x00;
    pub const PACKET_ERROR: u8 = 0x01;
    pub const NO_FINGER: u8 = 0x02;
    pub const NOT_FOUND: u8 = 0x09;
    pub const ENROLL_MISMATCH: u8 = 0x0A;
    pub const BAD_LOCATION: u8 = 0x0B;
}

/// Buffer the search runs against; enrollment fills 1..=captures before merging.
const SEARCH_BUFFER: u8 = 1;

pub fn checksum(pid: u8, payload: &[u8]) -> u16 {
    let len = (payload.len() + 2) as u16;
    let [len_hi, len_lo] = len.to_be_bytes();
    payload
        .iter()
        .fold(u16::from(pid) + u16::from(len_hi) + u16::from(len_lo), |sum, &byte| {
            sum.wrapping_add(u16::from(byte))
        })
}

/// Serialize a command packet.
pub fn encode_packet(address: u32, pid: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 2) as u16;
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len() + 2);
    packet.extend_from_slice(&START_CODE);
    packet.extend_from_slice(&address.to_be_bytes());
    packet.push(pid);
    packet.extend_from_slice(&len.to_be_bytes());
    packet.extend_from_slice(payload);
    packet.extend_from_slice(&checksum(pid, payload).to_be_bytes());
    packet
}

pub struct UartSensor<U> {
    uart: U,
    address: u32,
    capacity: u16,
}

impl<U> UartSensor<U>
where
    U: Read + Write,
{
    pub fn new(uart: U) -> Self {
        Self::with_address(uart, DEFAULT_ADDRESS, DEFAULT_CAPACITY)
    }

    pub fn with_address(uart: U, address: u32, capacity: u16) -> Self {
        Self {
            uart,
            address,
            capacity,
        }
    }

    pub fn into_inner(self) -> U {
        self.uart
    }

    /// Send one instruction and return the acknowledgement payload (confirmation code first).
    async fn command(&mut self, payload: &[u8], timeout_ms: u64) -> Result<Vec<u8>, SensorError> {
        let packet = encode_packet(self.address, PID_COMMAND, payload);
        self.uart
            .write_all(&packet)
            .await
            .map_err(|_| SensorError::Hardware(code::PACKET_ERROR))?;
        self.uart
            .flush()
            .await
            .map_err(|_| SensorError::Hardware(code::PACKET_ERROR))?;

        with_timeout(Duration::from_millis(timeout_ms), self.read_ack())
            .await
            .map_err(|_| SensorError::Hardware(code::PACKET_ERROR))?
    }

    async fn read_ack(&mut self) -> Result<Vec<u8>, SensorError> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header).await?;
        if header[..2] != START_CODE || header[6] != PID_ACK {
            log::warn!("sensor sent unexpected header {header:02X?}");
            return Err(SensorError::Hardware(code::PACKET_ERROR));
        }

        let len = usize::from(u16::from_be_bytes([header[7], header[8]]));
        if !(3..=MAX_PAYLOAD_LEN + 2).contains(&len) {
            return Err(SensorError::Hardware(code::PACKET_ERROR));
        }
        let mut body = alloc::vec![0u8; len];
        self.read_exact(&mut body).await?;

        let (payload, sum) = body.split_at(len - 2);
        if u16::from_be_bytes([sum[0], sum[1]]) != checksum(PID_ACK, payload) {
            log::warn!("sensor checksum mismatch");
            return Err(SensorError::Hardware(code::PACKET_ERROR));
        }
        body.truncate(len - 2);
        Ok(body)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SensorError> {
        self.uart
            .read_exact(buf)
            .await
            .map_err(|_| SensorError::Hardware(code::PACKET_ERROR))
    }

    async fn simple(&mut self, payload: &[u8]) -> Result<u8, SensorError> {
        let ack = self.command(payload, RESPONSE_TIMEOUT_MS).await?;
        Ok(ack[0])
    }
}

fn expect_ok(code: u8) -> Result<(), SensorError> {
    match code {
        code::OK => Ok(()),
        other => Err(SensorError::Hardware(other)),
    }
}

impl<U> FingerprintSensor for UartSensor<U>
where
    U: Read + Write,
{
    async fn capture(&mut self) -> Result<Capture, SensorError> {
        match self.simple(&[instruction::GET_IMAGE]).await? {
            code::OK => Ok(Capture::Image),
            code::NO_FINGER => Ok(Capture::NoFinger),
            other => Err(SensorError::Hardware(other)),
        }
    }

    async fn extract(&mut self, buffer: u8) -> Result<(), SensorError> {
        expect_ok(self.simple(&[instruction::IMAGE_TO_TZ, buffer]).await?)
    }

    async fn generate_template(&mut self) -> Result<(), SensorError> {
        match self.simple(&[instruction::REG_MODEL]).await? {
            code::ENROLL_MISMATCH => Err(SensorError::EnrollMismatch),
            other => expect_ok(other),
        }
    }

    async fn store(&mut self, slot: u16) -> Result<(), SensorError> {
        let [hi, lo] = slot.to_be_bytes();
        match self.simple(&[instruction::STORE, SEARCH_BUFFER, hi, lo]).await? {
            code::BAD_LOCATION => Err(SensorError::BadLocation),
            other => expect_ok(other),
        }
    }

    async fn search(&mut self, timeout_ms: u32) -> Result<Option<Match>, SensorError> {
        let [count_hi, count_lo] = self.capacity.to_be_bytes();
        let ack = self
            .command(
                &[instruction::SEARCH, SEARCH_BUFFER, 0x00, 0x00, count_hi, count_lo],
                u64::from(timeout_ms),
            )
            .await?;
        match ack[0] {
            code::OK if ack.len() >= 5 => Ok(Some(Match {
                slot: u16::from_be_bytes([ack[1], ack[2]]),
                score: u16::from_be_bytes([ack[3], ack[4]]),
            })),
            code::NOT_FOUND => Ok(None),
            other => Err(SensorError::Hardware(other)),
        }
    }

    async fn clear(&mut self) -> Result<(), SensorError> {
        expect_ok(self.simple(&[instruction::EMPTY]).await?)
    }

    async fn template_count(&mut self) -> Result<u16, SensorError> {
        let ack = self
            .command(&[instruction::TEMPLATE_COUNT], RESPONSE_TIMEOUT_MS)
            .await?;
        expect_ok(ack[0])?;
        match ack.get(1..3) {
            Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo])),
            _ => Err(SensorError::Hardware(code::PACKET_ERROR)),
        }
    }
}
