//! Device Data Model
//!
//! Typed field values and device status decoding.

mod status;
mod values;

pub use status::{DeviceStatus, MachineStatus, StatusCode, StatusDecoder, SwitchEvent, SWITCH_BETWEEN};
pub use values::{decode, Value};
