//! Capability surface consumed by the polling engine, the step packer, and
//! external layers (API handlers, bootstrap wiring).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::device::DeviceCode;
use crate::utils::error::{McSrvError, Result};

/// Character encoding for string reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringEncoding {
    /// Two 8-bit characters per word, low byte first
    Ascii,
    /// One UTF-16LE code unit per word
    Utf16le,
}

impl Default for StringEncoding {
    fn default() -> Self {
        StringEncoding::Ascii
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringEncoding::Ascii => write!(f, "ascii"),
            StringEncoding::Utf16le => write!(f, "utf16le"),
        }
    }
}

impl FromStr for StringEncoding {
    type Err = McSrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascii" => Ok(StringEncoding::Ascii),
            "utf16le" => Ok(StringEncoding::Utf16le),
            other => Err(McSrvError::InvalidParameter(format!(
                "Unknown string encoding: {}",
                other
            ))),
        }
    }
}

/// Controller communication capability.
///
/// One implementation per controller target; all operations funnel through
/// the implementation's single request queue, so callers get FIFO completion
/// without further coordination.
#[async_trait]
pub trait Communication: Send + Sync {
    /// Establish the controller session
    async fn connect(&self) -> Result<()>;

    /// Tear down the session, failing queued and in-flight requests
    async fn disconnect(&self) -> Result<()>;

    /// Whether a session is currently established
    async fn is_connection_active(&self) -> bool;

    /// Read `count` words starting at `start`
    async fn read_words(&self, dev: DeviceCode, start: u32, count: u16) -> Result<Vec<u16>>;

    /// Write `words` starting at `start`
    async fn write_words(&self, dev: DeviceCode, start: u32, words: &[u16]) -> Result<()>;

    /// Alias of [`Communication::read_words`]
    async fn read_numbers(&self, dev: DeviceCode, start: u32, count: u16) -> Result<Vec<u16>> {
        self.read_words(dev, start, count).await
    }

    /// Alias of [`Communication::write_words`]
    async fn write_numbers(&self, dev: DeviceCode, start: u32, words: &[u16]) -> Result<()> {
        self.write_words(dev, start, words).await
    }

    /// Read one bit (0 = LSB) of the word at `address`
    async fn read_bit(&self, dev: DeviceCode, address: u32, bit: u8) -> Result<bool>;

    /// Set or clear one bit of the word at `address`.
    ///
    /// Read-modify-write across two queued wire operations; concurrent bit
    /// writes to the same word can race and lose an update.
    async fn write_bit(&self, dev: DeviceCode, address: u32, bit: u8, value: bool) -> Result<()>;

    /// Read a null-terminated string of up to `max_chars` characters.
    ///
    /// Only data and file registers hold strings; other areas fail fast.
    async fn read_string(
        &self,
        dev: DeviceCode,
        start: u32,
        encoding: StringEncoding,
        max_chars: u16,
    ) -> Result<String>;

    /// Write a null-terminated string
    async fn write_string(
        &self,
        dev: DeviceCode,
        start: u32,
        text: &str,
        encoding: StringEncoding,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_parsing() {
        assert_eq!(
            "ascii".parse::<StringEncoding>().unwrap(),
            StringEncoding::Ascii
        );
        assert_eq!(
            "UTF16LE".parse::<StringEncoding>().unwrap(),
            StringEncoding::Utf16le
        );
        assert!("utf8".parse::<StringEncoding>().is_err());
        assert_eq!(StringEncoding::default(), StringEncoding::Ascii);
    }
}
