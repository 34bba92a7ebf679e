//! # LCR Core Library
//!
//! Driver for LiquidControls LCR 600 electronic registers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding and reply parsing for the LCR serial protocol
//! - A request/reply controller that rides out queued requests
//! - Field catalog and typed value decoding
//! - Device and machine status decoding
//! - Delivery (flow) summaries for volume fields
//!
//! ## Example
//!
//! ```rust,ignore
//! use lcr_core::prelude::*;
//!
//! let mut driver = Driver::serial(ConnectionConfig {
//!     port_name: "/dev/ttyUSB0".into(),
//!     ..Default::default()
//! });
//! let mut events = driver.subscribe();
//! driver.open()?;
//! driver.get_product_id(true).await?;
//! let gross = driver.request_attribute("GrossQty_NE").await?;
//! ```

/// Field catalog and reference tables
pub mod catalog;
/// Value and status decoding
pub mod device;
/// Driver facade
pub mod driver;
/// Events published to subscribers
pub mod events;
/// Frame codec and request/reply controller
pub mod protocol;
/// Delivery summaries
pub mod summary;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{FieldCatalog, FieldDescriptor, FieldType};
    pub use crate::device::{DeviceStatus, MachineStatus, StatusDecoder, SwitchEvent, Value};
    pub use crate::driver::Driver;
    pub use crate::events::{DataEvent, DriverEvent, FailedEvent, FieldReading};
    pub use crate::protocol::{
        Connection, ConnectionConfig, ConnectionState, CrcMode, Outcome, ProtocolError,
        SerialTransport, Transport, TransportEvent,
    };
    pub use crate::summary::{FlowSummarizer, FlowSummary};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
