//! Error handling for the MC gateway service
//!
//! This module provides the error type definitions used across the service.
//! Validation errors are raised before any wire access and are never retried;
//! protocol errors carry the controller's end code verbatim; transport errors
//! are surfaced to the immediate caller.

use thiserror::Error;

/// MC Gateway Service Error Type
#[derive(Error, Debug, Clone)]
pub enum McSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// General protocol communication errors (malformed frames, bad lengths)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Controller answered with a non-zero end code
    #[error("PLC responded with end code 0x{0:04x}")]
    EndCode(u16),

    /// Connection establishment errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The connection dropped while requests were queued or in flight
    #[error("Connection lost")]
    ConnectionLost,

    /// Not connected error
    #[error("Not connected")]
    NotConnected,

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Invalid parameter errors (bad device area, bit position, value type)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid data format or content errors (odd payloads, out-of-range offsets)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Entity lookup errors (unknown tag, data set, function)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cache store errors
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<std::io::Error> for McSrvError {
    fn from(err: std::io::Error) -> Self {
        McSrvError::IoError(err.to_string())
    }
}

/// Result type alias for the service
pub type Result<T> = std::result::Result<T, McSrvError>;
