//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The port could not be opened or written
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// A request was made before `open()`
    #[error("Not connected to device")]
    NotConnected,

    /// The transport task went away
    #[error("Transport channel closed")]
    ChannelClosed,

    /// Reply bytes do not form a frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Reply checksum differs from the computed one (strict mode)
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// Computed over the received bytes
        expected: u16,
        /// Carried in the frame trailer
        actual: u16,
    },

    /// No reply within `response_timeout_ms`
    #[error("Timed out waiting for a reply")]
    Timeout,

    /// The device kept answering REQUEST_QUEUED
    #[error("Request {message_id:#04x} still queued after {attempts} status checks")]
    RetriesExhausted {
        /// Original request
        message_id: u8,
        /// Status checks sent
        attempts: u32,
    },

    /// Field name not in the catalog
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Argument rejected before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors produced while turning a field payload into a typed value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload shorter than the type needs
    #[error("Buffer too short: need {expected} bytes, got {actual}")]
    BufferTooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Type name not recognised
    #[error("Unknown data type: {0}")]
    UnknownType(String),
}
