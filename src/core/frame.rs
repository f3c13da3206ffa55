//! MC-protocol 3E binary frame codec
//!
//! Builds request frames and parses response frames for the Mitsubishi
//! "3E binary" format. Pure functions, no connection state.
//!
//! Request layout (all fields little-endian):
//!
//! ```text
//! offset  0  u16  sub-header 0x0050
//! offset  2  u8   network number 0x00
//! offset  3  u8   station number 0xFF
//! offset  4  u16  destination module 0x03FF
//! offset  6  u8   multidrop station 0x00
//! offset  7  u16  body length (bytes following this field)
//! offset  9  u16  monitoring timer 0x0010
//! offset 11  u16  command (0x0401 read, 0x1401 write)
//! offset 13  u16  subcommand 0x0000
//! offset 15  u24  start address
//! offset 18  u8   device code
//! offset 19  u16  word count
//! offset 21  ...  write payload words (writes only)
//! ```
//!
//! A response is a 9-byte header whose last two bytes declare the body
//! length, followed by a 2-byte end code and the optional read payload.

use bytes::{Buf, BytesMut};

use crate::core::device::DeviceCode;
use crate::utils::error::{McSrvError, Result};

/// Fixed response header length for the 3E frame
pub const HEADER_LEN_3E: usize = 9;

/// Command code: read in word units
pub const CMD_READ_WORDS: u16 = 0x0401;
/// Command code: write in word units
pub const CMD_WRITE_WORDS: u16 = 0x1401;

const SUB_HEADER: u16 = 0x0050;
const DEST_MODULE: u16 = 0x03FF;
const MONITORING_TIMER: u16 = 0x0010;
const SUBCOMMAND: u16 = 0x0000;
const MAX_START_ADDRESS: u32 = 0x00FF_FFFF;

/// Fixed request prefix shared by reads and writes
fn push_request_header(buf: &mut Vec<u8>, body_len: u16) {
    buf.extend_from_slice(&SUB_HEADER.to_le_bytes());
    buf.push(0x00); // network
    buf.push(0xFF); // station
    buf.extend_from_slice(&DEST_MODULE.to_le_bytes());
    buf.push(0x00); // multidrop station
    buf.extend_from_slice(&body_len.to_le_bytes());
}

fn push_device_block(buf: &mut Vec<u8>, command: u16, dev: DeviceCode, start: u32, count: u16) {
    buf.extend_from_slice(&MONITORING_TIMER.to_le_bytes());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&SUBCOMMAND.to_le_bytes());
    let addr = start.to_le_bytes();
    buf.extend_from_slice(&addr[..3]);
    buf.push(dev.wire_code());
    buf.extend_from_slice(&count.to_le_bytes());
}

fn check_start(start: u32) -> Result<()> {
    if start > MAX_START_ADDRESS {
        return Err(McSrvError::InvalidParameter(format!(
            "Start address {} exceeds 24-bit range",
            start
        )));
    }
    Ok(())
}

/// Build a read-word-units request frame
pub fn build_read_request(dev: DeviceCode, start: u32, count: u16) -> Result<Vec<u8>> {
    check_start(start)?;
    let mut buf = Vec::with_capacity(21);
    push_request_header(&mut buf, 12);
    push_device_block(&mut buf, CMD_READ_WORDS, dev, start, count);
    Ok(buf)
}

/// Build a write-word-units request frame carrying `words` as payload
pub fn build_write_request(dev: DeviceCode, start: u32, words: &[u16]) -> Result<Vec<u8>> {
    check_start(start)?;
    let payload_len = words.len() * 2;
    let mut buf = Vec::with_capacity(21 + payload_len);
    push_request_header(&mut buf, (12 + payload_len) as u16);
    push_device_block(&mut buf, CMD_WRITE_WORDS, dev, start, words.len() as u16);
    for w in words {
        buf.extend_from_slice(&w.to_le_bytes());
    }
    Ok(buf)
}

/// Parsed 3E response frame
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    /// Controller status; zero means success
    pub end_code: u16,
    /// Raw payload bytes after the end code
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    /// Parse a complete response frame as sliced off by the receive buffer.
    ///
    /// The slice must be exactly one frame: 9-byte header plus the declared
    /// body length.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN_3E + 2 {
            return Err(McSrvError::ProtocolError(format!(
                "Response frame too short: {} bytes",
                data.len()
            )));
        }
        let declared = u16::from_le_bytes([data[7], data[8]]) as usize;
        if data.len() != HEADER_LEN_3E + declared {
            return Err(McSrvError::ProtocolError(format!(
                "Declared body length {} does not match frame length {}",
                declared,
                data.len()
            )));
        }
        let end_code = u16::from_le_bytes([data[HEADER_LEN_3E], data[HEADER_LEN_3E + 1]]);
        Ok(Self {
            end_code,
            payload: data[HEADER_LEN_3E + 2..].to_vec(),
        })
    }

    /// Fail with the controller's end code unless it is zero
    pub fn check_end_code(&self) -> Result<()> {
        if self.end_code != 0 {
            return Err(McSrvError::EndCode(self.end_code));
        }
        Ok(())
    }

    /// Decode the payload as little-endian 16-bit words.
    ///
    /// An odd trailing byte is a format error, not silently dropped.
    pub fn words(&self) -> Result<Vec<u16>> {
        if self.payload.len() % 2 != 0 {
            return Err(McSrvError::InvalidData(format!(
                "Payload of {} bytes is not a whole number of words",
                self.payload.len()
            )));
        }
        Ok(self
            .payload
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }
}

/// Streaming reassembler for response frames.
///
/// Bytes accumulate in a growing buffer; once 9 bytes are available the
/// total frame length is computed once and cached; complete frames are
/// sliced off the front and any remainder is kept as the start of the next
/// frame. Handles responses split across socket reads as well as several
/// logical responses arriving in one read.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: BytesMut,
    expected: Option<usize>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            expected: None,
        }
    }

    /// Append received bytes and return every complete frame now available
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            if self.expected.is_none() && self.buf.len() >= HEADER_LEN_3E {
                let declared = u16::from_le_bytes([self.buf[7], self.buf[8]]) as usize;
                self.expected = Some(HEADER_LEN_3E + declared);
            }
            match self.expected {
                Some(total) if self.buf.len() >= total => {
                    frames.push(self.buf.copy_to_bytes(total).to_vec());
                    self.expected = None;
                }
                _ => break,
            }
        }
        frames
    }

    /// Drop all buffered bytes and length state
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = None;
    }
}
