//! Protocol commands
//!
//! Message ids understood by the LCR 600 and the parameters some of them take.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Request message ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    /// Read the product id string (0x00)
    ProductId,
    /// Read a field value (0x20)
    GetField,
    /// Write a field value (0x21)
    SetField,
    /// Read the machine status block (0x23)
    DeviceStatus,
    /// Issue a register command (0x24)
    IssueCommand,
    /// Change the node address (0x25)
    SetAddress,
    /// Change the line baud rate (0x7C)
    SetBaudRate,
    /// Poll the state of a queued request (0x7D)
    CheckRequest,
}

impl MessageId {
    /// Wire byte for this message id
    pub fn byte(&self) -> u8 {
        match self {
            MessageId::ProductId => 0x00,
            MessageId::GetField => 0x20,
            MessageId::SetField => 0x21,
            MessageId::DeviceStatus => 0x23,
            MessageId::IssueCommand => 0x24,
            MessageId::SetAddress => 0x25,
            MessageId::SetBaudRate => 0x7C,
            MessageId::CheckRequest => 0x7D,
        }
    }

    /// Look up a message id from its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(MessageId::ProductId),
            0x20 => Some(MessageId::GetField),
            0x21 => Some(MessageId::SetField),
            0x23 => Some(MessageId::DeviceStatus),
            0x24 => Some(MessageId::IssueCommand),
            0x25 => Some(MessageId::SetAddress),
            0x7C => Some(MessageId::SetBaudRate),
            0x7D => Some(MessageId::CheckRequest),
            _ => None,
        }
    }

    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            MessageId::ProductId => "Product ID request",
            MessageId::GetField => "Get field request",
            MessageId::SetField => "Set field request",
            MessageId::DeviceStatus => "Device status request",
            MessageId::IssueCommand => "Issue command request",
            MessageId::SetAddress => "Set device address request",
            MessageId::SetBaudRate => "Set baud rate request",
            MessageId::CheckRequest => "Check request status",
        }
    }
}

/// Baud rates the register can be switched to with [`MessageId::SetBaudRate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaudRate {
    /// 57600 bps, index 0
    B57600,
    /// 19200 bps, index 1
    B19200,
    /// 9600 bps, index 2
    B9600,
    /// 4800 bps, index 3
    B4800,
    /// 2400 bps, index 4
    B2400,
}

impl BaudRate {
    /// Index sent as the request parameter
    pub fn index(&self) -> u8 {
        match self {
            BaudRate::B57600 => 0,
            BaudRate::B19200 => 1,
            BaudRate::B9600 => 2,
            BaudRate::B4800 => 3,
            BaudRate::B2400 => 4,
        }
    }

    /// Bits per second
    pub fn bps(&self) -> u32 {
        match self {
            BaudRate::B57600 => 57600,
            BaudRate::B19200 => 19200,
            BaudRate::B9600 => 9600,
            BaudRate::B4800 => 4800,
            BaudRate::B2400 => 2400,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ProtocolError;

    fn try_from(bps: u32) -> Result<Self, Self::Error> {
        match bps {
            57600 => Ok(BaudRate::B57600),
            19200 => Ok(BaudRate::B19200),
            9600 => Ok(BaudRate::B9600),
            4800 => Ok(BaudRate::B4800),
            2400 => Ok(BaudRate::B2400),
            other => Err(ProtocolError::InvalidArgument(format!(
                "unsupported baud rate {}; accepted: 57600, 19200, 9600, 4800, 2400",
                other
            ))),
        }
    }
}
