//! Device and machine status decoding
//!
//! Every successful field reply carries a device status byte: switch
//! position in the low nibble, machine state in the high nibble. The
//! device-status request returns a five byte block with printer status,
//! delivery status bits and delivery code bits.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::catalog::tables::{
    describe, describe_reserved, DELIVERY_CODE, DELIVERY_STATUS, MACHINE_STATES, PRINTER_STATUS,
    SWITCH_POSITIONS,
};
use crate::protocol::DecodeError;

/// Switch position reported while the knob is between detents
pub const SWITCH_BETWEEN: u8 = 0x00;

/// A status code with its description from the reference tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCode {
    /// Masked code
    pub code: u16,
    /// `None` for reserved or unknown codes
    pub description: Option<&'static str>,
}

impl StatusCode {
    fn switch(code: u8) -> Self {
        Self {
            code: code as u16,
            description: describe_reserved(SWITCH_POSITIONS, code),
        }
    }

    fn state(code: u8) -> Self {
        Self {
            code: code as u16,
            description: describe_reserved(MACHINE_STATES, code),
        }
    }
}

/// Decoded device status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    /// Raw byte
    pub code: u8,
    /// Switch position (low nibble)
    pub switch: StatusCode,
    /// Machine state (high nibble)
    pub state: StatusCode,
}

/// Switch moved from one position to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwitchEvent {
    /// Previous position
    pub from: StatusCode,
    /// New position
    pub to: StatusCode,
}

/// Decoded machine status block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineStatus {
    /// Printer status byte
    pub printer_status: StatusCode,
    /// Raw delivery status bits
    pub delivery_status_bits: u16,
    /// High half then low half, each looked up on its own
    pub delivery_status: [StatusCode; 2],
    /// Raw delivery code bits
    pub delivery_code_bits: u16,
    /// High half then low half, each looked up on its own
    pub delivery_code: [StatusCode; 2],
}

/// Stateful status decoder; remembers the last switch position
#[derive(Debug, Default)]
pub struct StatusDecoder {
    last_switch: Option<u8>,
}

impl StatusDecoder {
    /// Decoder with no switch position seen yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Last non-neutral switch position seen
    pub fn last_switch(&self) -> Option<u8> {
        self.last_switch
    }

    /// Decode a device status byte. Returns a switch event when the position
    /// changed to a new non-neutral value after a previous observation.
    pub fn decode_device_status(&mut self, byte: u8) -> (DeviceStatus, Option<SwitchEvent>) {
        let switch = byte & 0x0F;
        let state = byte & 0xF0;

        let mut event = None;
        if switch != SWITCH_BETWEEN && self.last_switch != Some(switch) {
            if let Some(previous) = self.last_switch {
                event = Some(SwitchEvent {
                    from: StatusCode::switch(previous),
                    to: StatusCode::switch(switch),
                });
            }
            self.last_switch = Some(switch);
        }

        let status = DeviceStatus {
            code: byte,
            switch: StatusCode::switch(switch),
            state: StatusCode::state(state),
        };
        (status, event)
    }

    /// Decode the five byte machine status block
    pub fn decode_machine_status(bytes: &[u8]) -> Result<MachineStatus, DecodeError> {
        if bytes.len() < 5 {
            return Err(DecodeError::BufferTooShort {
                expected: 5,
                actual: bytes.len(),
            });
        }

        let halves = |bits: u16, table: &[(u16, &'static str)]| {
            let high = bits & 0xFF00;
            let low = bits & 0x00FF;
            [
                StatusCode {
                    code: high,
                    description: describe(table, high),
                },
                StatusCode {
                    code: low,
                    description: describe(table, low),
                },
            ]
        };

        let delivery_status_bits = BigEndian::read_u16(&bytes[1..3]);
        let delivery_code_bits = BigEndian::read_u16(&bytes[3..5]);

        Ok(MachineStatus {
            printer_status: StatusCode {
                code: bytes[0] as u16,
                description: describe(PRINTER_STATUS, bytes[0]),
            },
            delivery_status_bits,
            delivery_status: halves(delivery_status_bits, DELIVERY_STATUS),
            delivery_code_bits,
            delivery_code: halves(delivery_code_bits, DELIVERY_CODE),
        })
    }
}
