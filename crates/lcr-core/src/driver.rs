//! LCR 600 driver
//!
//! The public face of the crate. A [`Driver`] owns one [`Connection`] and the
//! attribute cache, validates caller input before anything reaches the wire,
//! and exposes one async method per device operation. Every decoded reply,
//! finished delivery and transport lifecycle change is also published on a
//! broadcast channel (see [`Driver::subscribe`]).
//!
//! ```rust,ignore
//! use lcr_core::prelude::*;
//!
//! let config = ConnectionConfig {
//!     port_name: "/dev/ttyUSB0".into(),
//!     ..Default::default()
//! };
//! let mut driver = Driver::serial(config);
//! driver.open()?;
//! let product = driver.get_product_id(true).await?;
//! let volume = driver.request_attribute("GrossQty_NE").await?;
//! ```

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::catalog::{FieldCatalog, FieldDescriptor};
use crate::device::Value;
use crate::events::DriverEvent;
use crate::protocol::{
    BaudRate, Connection, ConnectionConfig, MessageId, Outcome, ProtocolError, SerialTransport,
    Transport,
};

/// Attribute key of the product id string
pub const PRODUCT_ID: &str = "productId";

const EVENT_CAPACITY: usize = 256;

/// Driver for one LCR 600 register
pub struct Driver {
    connection: Connection,
    events: broadcast::Sender<DriverEvent>,
    attributes: HashMap<String, Value>,
}

impl Driver {
    /// Create a driver over any transport, using the built-in field catalog
    pub fn new(config: ConnectionConfig, transport: Box<dyn Transport>) -> Self {
        Self::with_catalog(config, transport, FieldCatalog::builtin())
    }

    /// Create a driver with a custom field catalog
    pub fn with_catalog(
        config: ConnectionConfig,
        transport: Box<dyn Transport>,
        catalog: FieldCatalog,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connection = Connection::new(config, transport, Arc::new(catalog), events.clone());
        Self {
            connection,
            events,
            attributes: HashMap::new(),
        }
    }

    /// Create a driver on the serial port named in `config`
    pub fn serial(config: ConnectionConfig) -> Self {
        let transport = SerialTransport::new(config.port_name.clone(), config.baud_rate)
            .with_inter_byte_timeout(Duration::from_millis(config.inter_byte_timeout_ms));
        Self::new(config, Box::new(transport))
    }

    /// Open the transport
    pub fn open(&mut self) -> Result<(), ProtocolError> {
        self.connection.open()
    }

    /// Close the transport
    pub fn close(&mut self) {
        self.connection.close()
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    /// The underlying controller
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The field catalog in use
    pub fn catalog(&self) -> &FieldCatalog {
        self.connection.catalog()
    }

    /// Last known value of an attribute
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// All known attributes
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Forward lifecycle events the transport queued while no request was running
    pub fn poll_events(&mut self) {
        self.connection.drain_inbound();
    }

    fn field(&self, name: &str) -> Result<FieldDescriptor, ProtocolError> {
        self.connection
            .catalog()
            .field(name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownField(name.to_string()))
    }

    async fn send(
        &mut self,
        message: MessageId,
        params: &[u8],
        field: Option<FieldDescriptor>,
        sync: bool,
    ) -> Result<Outcome, ProtocolError> {
        let outcome = self
            .connection
            .request(message.byte(), params, field, sync)
            .await?;

        match &outcome {
            Outcome::ProductId(value) => {
                self.attributes
                    .insert(PRODUCT_ID.to_string(), Value::Text(value.clone()));
            }
            Outcome::Field(reading) => {
                if let Some(value) = &reading.value {
                    self.attributes.insert(reading.name.clone(), value.clone());
                }
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Read the product id string
    pub async fn get_product_id(&mut self, sync: bool) -> Result<Outcome, ProtocolError> {
        self.send(MessageId::ProductId, &[], None, sync).await
    }

    /// Read the machine status block
    pub async fn get_device_status(&mut self, sync: bool) -> Result<Outcome, ProtocolError> {
        self.send(MessageId::DeviceStatus, &[], None, sync).await
    }

    /// Read one field
    pub async fn get_data(&mut self, name: &str, sync: bool) -> Result<Outcome, ProtocolError> {
        let field = self.field(name)?;
        self.send(MessageId::GetField, &[field.id], Some(field), sync)
            .await
    }

    /// Issue a set-field request for one field
    pub async fn set_field(&mut self, name: &str, sync: bool) -> Result<Outcome, ProtocolError> {
        let field = self.field(name)?;
        self.send(MessageId::SetField, &[field.id], Some(field), sync)
            .await
    }

    /// Read a field and return its value; the value is also cached as an attribute
    pub async fn request_attribute(&mut self, name: &str) -> Result<Option<Value>, ProtocolError> {
        match self.get_data(name, false).await? {
            Outcome::Field(reading) => Ok(reading.value),
            _ => Ok(None),
        }
    }

    /// Time a numeric field must hold its value before a delivery is finished
    pub fn set_waiting_time(&mut self, ms: u64) {
        self.connection.summarizer_mut().set_settle_ms(ms);
    }

    /// Finish the delivery in progress on `name` with the next reading.
    ///
    /// Returns `false` without touching the device when no delivery is in
    /// progress; otherwise reads the field right away.
    pub async fn interrupt_summary(&mut self, name: &str) -> Result<bool, ProtocolError> {
        self.field(name)?;
        if !self.connection.summarizer_mut().interrupt(name) {
            debug!("no delivery in progress on {}", name);
            return Ok(false);
        }
        self.get_data(name, false).await?;
        Ok(true)
    }

    /// Start summarizing `name` over from its current reading.
    ///
    /// Returns `false` when the field was never read or the reading could not be used.
    pub async fn reset_summary(&mut self, name: &str) -> Result<bool, ProtocolError> {
        self.field(name)?;
        if self.connection.summarizer().state(name).is_none() {
            return Ok(false);
        }

        let value = match self.get_data(name, false).await? {
            Outcome::Field(reading) => reading.value.as_ref().and_then(Value::as_f64),
            _ => None,
        };
        Ok(match value {
            Some(value) => self
                .connection
                .summarizer_mut()
                .reset(name, value, Utc::now()),
            None => false,
        })
    }

    /// Change the device's node address; later requests go to the new address
    pub async fn set_device_address(
        &mut self,
        address: u8,
        sync: bool,
    ) -> Result<Outcome, ProtocolError> {
        let outcome = self
            .send(MessageId::SetAddress, &[address], None, sync)
            .await?;
        if let Outcome::Acknowledged { .. } = outcome {
            info!("device now at node address {:#04x}", address);
            self.connection.set_node_address(address);
        }
        Ok(outcome)
    }

    /// Switch the device's line speed
    pub async fn set_baud_rate(&mut self, bps: u32, sync: bool) -> Result<Outcome, ProtocolError> {
        let rate = BaudRate::try_from(bps)?;
        self.send(MessageId::SetBaudRate, &[rate.index()], None, sync)
            .await
    }

    /// Issue a register command, given by code (`"2"`, `"0x02"`) or by a name from the catalog
    pub async fn issue_command(
        &mut self,
        command: &str,
        sync: bool,
    ) -> Result<Outcome, ProtocolError> {
        let code = self.catalog().command_code(command).ok_or_else(|| {
            ProtocolError::InvalidArgument(format!("unknown command {:?}", command))
        })?;
        self.send(MessageId::IssueCommand, &[code], None, sync)
            .await
    }
}
