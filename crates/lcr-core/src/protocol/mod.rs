//! Serial Protocol Communication
//!
//! Implements the LCR 600 framed protocol: header-delimited frames with
//! byte stuffing and a CRC-16 trailer, a half-duplex request/reply cycle and
//! the device-side "request queued" retry loop.

/// Message ids and baud rates
pub mod commands;
mod connection;
mod error;
mod packet;
/// Serial port transport
pub mod serial;
/// Transport abstraction
pub mod stream;

pub use commands::{BaudRate, MessageId};
pub use connection::{Connection, ConnectionConfig, ConnectionState, CrcMode, Outcome};
pub use error::{DecodeError, ProtocolError};
pub use packet::{crc16, unescape, Packet, PacketBuilder, ParsedResponse, ResponseData};
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use stream::{Transport, TransportEvent};

/// Frame delimiter, sent twice at the start of every frame
pub const HEADER: u8 = 0x7E;

/// Escape byte inserted before any HEADER or ESCAPE byte in the frame body
pub const ESCAPE: u8 = 0x1B;

/// CRC-CCITT generator polynomial
pub const POLYNOMIAL: u16 = 0x1021;

/// Default baud rate of an LCR 600 register
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default LCR node address
pub const DEFAULT_NODE_ADDRESS: u8 = 0x00;

/// Default host (source) address
pub const DEFAULT_HOST_ADDRESS: u8 = 0xFF;

/// Silence on the line after which a received burst is treated as one frame
pub const DEFAULT_INTER_BYTE_TIMEOUT_MS: u64 = 30;

/// Return code of a successful request
pub const RC_SUCCESS: u8 = 0x00;

/// Return code meaning the device accepted the request but deferred it
pub const RC_REQUEST_QUEUED: u8 = 0x26;
