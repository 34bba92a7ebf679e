//! Driver events
//!
//! Everything the driver reports asynchronously: decoded data, finished
//! deliveries, failed requests, switch movements and the transport's own
//! lifecycle.

use serde::Serialize;

use crate::catalog::tables::{describe, RETURN_CODES};
use crate::device::{DeviceStatus, MachineStatus, SwitchEvent, Value};
use crate::protocol::MessageId;
use crate::summary::FlowSummary;

/// A return code with its description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReturnCode {
    /// First payload byte of the reply
    pub code: u8,
    /// Known meaning, if any
    pub description: Option<&'static str>,
}

impl ReturnCode {
    /// Look up the description of `code`
    pub fn new(code: u8) -> Self {
        Self {
            code,
            description: describe(RETURN_CODES, code),
        }
    }
}

/// A message id with its description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageCode {
    /// Message id byte
    pub code: u8,
    /// Description of the request
    pub description: Option<&'static str>,
}

impl MessageCode {
    /// Look up the description of message id `code`
    pub fn new(code: u8) -> Self {
        Self {
            code,
            description: MessageId::from_byte(code).map(|id| id.description()),
        }
    }
}

/// One field reading as returned by a get-field request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldReading {
    /// Catalog name of the field
    pub name: String,
    /// `None` when the payload could not be decoded
    pub value: Option<Value>,
    /// Device status carried by the reply
    pub status: Option<DeviceStatus>,
}

/// Successfully decoded reply content
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataEvent {
    /// Product id string
    ProductId {
        /// Text with the trailing NUL removed
        value: String,
    },
    /// A field value
    Field(FieldReading),
    /// Machine status block
    MachineStatus {
        /// Return code of the reply
        status: ReturnCode,
        /// Decoded block
        value: MachineStatus,
    },
    /// The device executed a command
    IssueCommand {
        /// Return code of the reply
        status: ReturnCode,
    },
}

/// A request the device answered with an error code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEvent {
    /// Non-zero return code
    pub code: u8,
    /// Known meaning, if any
    pub description: Option<&'static str>,
    /// Field being requested, for get/set-field requests
    pub name: Option<String>,
    /// Request that failed
    pub message_id: MessageCode,
}

/// Events published by the driver
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DriverEvent {
    /// Transport opened the named port
    Open(String),
    /// Transport closed the named port
    Close(String),
    /// Transport error, passed through
    Error(String),
    /// Decoded reply content
    Data(DataEvent),
    /// A delivery finished on a numeric field
    Summary(FlowSummary),
    /// The device refused a request
    Failed(FailedEvent),
    /// The register's switch moved
    Switch(SwitchEvent),
}
