//! Connection management
//!
//! The request/response controller. It frames requests, keeps the single
//! in-flight request slot, correlates the next reply to it, rides out
//! "request queued" replies with check-request (0x7D) frames and a growing
//! delay, and dispatches the decoded reply.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{
    MessageId, PacketBuilder, ParsedResponse, ProtocolError, ResponseData, Transport,
    TransportEvent, DEFAULT_BAUD_RATE, DEFAULT_HOST_ADDRESS, DEFAULT_INTER_BYTE_TIMEOUT_MS,
    DEFAULT_NODE_ADDRESS, RC_REQUEST_QUEUED,
};
use crate::catalog::{FieldCatalog, FieldDescriptor, FieldType};
use crate::device::{decode, DeviceStatus, StatusDecoder};
use crate::events::{
    DataEvent, DriverEvent, FailedEvent, FieldReading, MessageCode, ReturnCode,
};
use crate::summary::{FlowSummarizer, DEFAULT_SETTLE_MS};

/// What to do with a reply whose CRC trailer does not match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrcMode {
    /// Log the mismatch and use the reply anyway
    #[default]
    Lenient,
    /// Reject the reply
    Strict,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// LCR node (destination) address
    pub node_address: u8,
    /// Host (source) address
    pub host_address: u8,
    /// Line silence that ends a received frame
    pub inter_byte_timeout_ms: u64,
    /// First delay before checking on a queued request
    pub retry_base_delay_ms: u64,
    /// Ceiling of the status-check delay
    pub retry_max_delay_ms: u64,
    /// Status checks allowed per request; `None` keeps checking for as long as the device queues
    pub max_retries: Option<u32>,
    /// Give up on a reply after this long; `None` waits indefinitely
    pub response_timeout_ms: Option<u64>,
    /// Handling of replies whose CRC trailer does not match
    pub crc_mode: CrcMode,
    /// Time a reading must hold before a delivery is finished
    pub settle_time_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            node_address: DEFAULT_NODE_ADDRESS,
            host_address: DEFAULT_HOST_ADDRESS,
            inter_byte_timeout_ms: DEFAULT_INTER_BYTE_TIMEOUT_MS,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 500,
            max_retries: None,
            response_timeout_ms: None,
            crc_mode: CrcMode::Lenient,
            settle_time_ms: DEFAULT_SETTLE_MS,
        }
    }
}

impl ConnectionConfig {
    /// Load a configuration from a JSON file; missing keys take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content).map_err(|e| {
            ProtocolError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })
    }
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Transport not opened
    Disconnected,
    /// No request in flight
    Idle,
    /// Request sent, waiting for its reply
    AwaitingReply {
        /// Request in flight
        message_id: u8,
    },
    /// Device queued the request; waiting before the next status check
    Retrying {
        /// Request the device queued
        message_id: u8,
        /// Wait before the next status check
        delay_ms: u64,
    },
}

/// Result of one request/reply exchange
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Product id string
    ProductId(String),
    /// Decoded field value
    Field(FieldReading),
    /// Decoded machine status block
    MachineStatus(crate::device::MachineStatus),
    /// Issue-command succeeded
    CommandIssued(ReturnCode),
    /// Set-field, set-address or set-baud succeeded
    Acknowledged {
        /// Request that was acknowledged
        message_id: u8,
    },
    /// Device answered with an error code
    Failed(FailedEvent),
    /// Reply carried nothing that could be used: a field reply with no
    /// pending field, or an undecodable status block
    Unmatched,
}

/// The single in-flight request
#[derive(Debug, Clone)]
struct PendingRequest {
    /// Monotonic request number, for log correlation
    seq: u64,
    message_id: u8,
    field: Option<FieldDescriptor>,
}

/// Half-duplex request/reply controller for one device
pub struct Connection {
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    events: broadcast::Sender<DriverEvent>,
    catalog: Arc<FieldCatalog>,
    state: ConnectionState,
    pending: Option<PendingRequest>,
    next_seq: u64,
    /// Last identifier bit sent
    identifier: bool,
    /// Whether the session's first (sync) request went out
    synchronized: bool,
    retry_delay_ms: u64,
    status: StatusDecoder,
    summarizer: FlowSummarizer,
}

impl Connection {
    /// Create a controller over `transport` (not yet opened)
    pub fn new(
        config: ConnectionConfig,
        transport: Box<dyn Transport>,
        catalog: Arc<FieldCatalog>,
        events: broadcast::Sender<DriverEvent>,
    ) -> Self {
        let retry_delay_ms = config.retry_base_delay_ms;
        let summarizer = FlowSummarizer::new(config.settle_time_ms);
        Self {
            config,
            transport,
            inbound: None,
            events,
            catalog,
            state: ConnectionState::Disconnected,
            pending: None,
            next_seq: 0,
            // toggled before every request, so the first request carries 0
            identifier: true,
            synchronized: false,
            retry_delay_ms,
            status: StatusDecoder::new(),
            summarizer,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current controller state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Field catalog used to decode replies
    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// Flow summary state per field
    pub fn summarizer(&self) -> &FlowSummarizer {
        &self.summarizer
    }

    /// Mutable access to the flow summary state
    pub fn summarizer_mut(&mut self) -> &mut FlowSummarizer {
        &mut self.summarizer
    }

    /// Status decoder holding the last switch position
    pub fn status_decoder(&self) -> &StatusDecoder {
        &self.status
    }

    /// Delay the next queued-request status check will wait
    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_delay_ms
    }

    /// Address subsequent requests to `address`
    pub fn set_node_address(&mut self, address: u8) {
        self.config.node_address = address;
    }

    /// Open the transport and start a new session
    pub fn open(&mut self) -> Result<(), ProtocolError> {
        self.transport.open()?;
        if self.inbound.is_none() {
            self.inbound = self.transport.take_events();
        }
        if self.inbound.is_none() {
            return Err(ProtocolError::ChannelClosed);
        }

        self.state = ConnectionState::Idle;
        self.synchronized = false;
        self.drain_inbound();
        Ok(())
    }

    /// Close the transport
    pub fn close(&mut self) {
        self.transport.close();
        self.pending = None;
        self.state = ConnectionState::Disconnected;
        self.drain_inbound();
    }

    /// Forward queued lifecycle events and drop replies nobody waits for
    pub fn drain_inbound(&mut self) {
        let mut queued = Vec::new();
        if let Some(inbound) = self.inbound.as_mut() {
            while let Ok(event) = inbound.try_recv() {
                queued.push(event);
            }
        }
        for event in queued {
            match event {
                TransportEvent::Frame(raw) => {
                    warn!("discarding unsolicited frame: {:02x?}", raw)
                }
                other => self.forward_lifecycle(other),
            }
        }
    }

    fn emit(&self, event: DriverEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn forward_lifecycle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened(msg) => self.emit(DriverEvent::Open(msg)),
            TransportEvent::Closed(msg) => {
                info!("transport closed: {}", msg);
                self.emit(DriverEvent::Close(msg));
            }
            TransportEvent::Error(msg) => {
                warn!("transport error: {}", msg);
                self.emit(DriverEvent::Error(msg));
            }
            TransportEvent::Frame(_) => {}
        }
    }

    /// Current status-check delay; the next one is 1ms longer, up to the ceiling
    fn next_retry_delay(&mut self) -> u64 {
        let delay = self.retry_delay_ms;
        self.retry_delay_ms = (self.retry_delay_ms + 1).min(self.config.retry_max_delay_ms);
        delay
    }

    /// Build the frame for a request, toggling the identifier bit
    fn frame(&mut self, message_id: u8, params: &[u8], sync: bool) -> Result<Vec<u8>, ProtocolError> {
        self.identifier = !self.identifier;
        let sync = sync || !self.synchronized;
        self.synchronized = true;

        let packet = PacketBuilder::new(self.config.node_address, self.config.host_address)
            .identifier(self.identifier)
            .sync(sync)
            .message(message_id)
            .bytes(params)
            .build()?;
        Ok(packet.to_bytes())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        debug!("tx {:02x?}", frame);
        let written = match self.transport.write(frame) {
            Ok(written) => written,
            Err(e) => {
                self.emit(DriverEvent::Error(e.to_string()));
                return Err(e);
            }
        };
        if !written {
            let msg = "transport refused write".to_string();
            self.emit(DriverEvent::Error(msg.clone()));
            return Err(ProtocolError::SerialError(msg));
        }
        Ok(())
    }

    /// Wait for the next reply buffer, forwarding lifecycle events meanwhile
    async fn next_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let timeout = self.config.response_timeout_ms.map(Duration::from_millis);
        loop {
            let inbound = self.inbound.as_mut().ok_or(ProtocolError::NotConnected)?;
            let event = match timeout {
                Some(limit) => tokio::time::timeout(limit, inbound.recv())
                    .await
                    .map_err(|_| ProtocolError::Timeout)?,
                None => inbound.recv().await,
            };
            match event {
                Some(TransportEvent::Frame(raw)) => return Ok(raw),
                Some(other) => self.forward_lifecycle(other),
                None => return Err(ProtocolError::ChannelClosed),
            }
        }
    }

    /// Send a request and wait for its final reply.
    ///
    /// `field` is the field a get/set-field request refers to; it labels the
    /// reply and any failure. Only one request may be in flight: the
    /// `&mut self` receiver serializes callers.
    pub async fn request(
        &mut self,
        message_id: u8,
        params: &[u8],
        field: Option<FieldDescriptor>,
        sync: bool,
    ) -> Result<Outcome, ProtocolError> {
        if self.state == ConnectionState::Disconnected {
            return Err(ProtocolError::NotConnected);
        }
        if let Some(stale) = self.pending.take() {
            // the previous caller stopped waiting mid-flight
            warn!(
                "request #{} ({:#04x}) abandoned before its reply",
                stale.seq, stale.message_id
            );
        }
        self.drain_inbound();

        self.next_seq += 1;
        self.pending = Some(PendingRequest {
            seq: self.next_seq,
            message_id,
            field,
        });

        let result = self.exchange(message_id, params, sync).await;

        self.pending = None;
        self.retry_delay_ms = self.config.retry_base_delay_ms;
        self.state = ConnectionState::Idle;
        result
    }

    async fn exchange(
        &mut self,
        message_id: u8,
        params: &[u8],
        sync: bool,
    ) -> Result<Outcome, ProtocolError> {
        let frame = self.frame(message_id, params, sync)?;
        self.transmit(&frame)?;
        self.state = ConnectionState::AwaitingReply { message_id };

        let mut checks = 0u32;
        loop {
            let raw = self.next_frame().await?;
            debug!("rx {:02x?}", raw);
            let response = ParsedResponse::parse(&raw)?;

            if !response.crc_ok() {
                match self.config.crc_mode {
                    CrcMode::Strict => {
                        return Err(ProtocolError::CrcMismatch {
                            expected: response.computed_crc,
                            actual: response.crc,
                        })
                    }
                    CrcMode::Lenient => warn!(
                        "CRC mismatch on reply to {:#04x}: computed {:#06x}, received {:#06x}",
                        message_id, response.computed_crc, response.crc
                    ),
                }
            }

            if response.return_code != RC_REQUEST_QUEUED {
                return Ok(self.dispatch(message_id, &response));
            }

            checks += 1;
            if let Some(max) = self.config.max_retries {
                if checks > max {
                    return Err(ProtocolError::RetriesExhausted {
                        message_id,
                        attempts: max,
                    });
                }
            }

            let delay_ms = self.next_retry_delay();
            debug!("request {:#04x} queued, checking again in {}ms", message_id, delay_ms);
            self.state = ConnectionState::Retrying {
                message_id,
                delay_ms,
            };
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            let check = self.frame(MessageId::CheckRequest.byte(), &[], false)?;
            self.transmit(&check)?;
            self.state = ConnectionState::AwaitingReply { message_id };
        }
    }

    fn field_name(&self, field: &FieldDescriptor) -> String {
        self.catalog
            .name_by_id(field.id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("field#{}", field.id))
    }

    /// Route a final reply by the id of the request it answers
    fn dispatch(&mut self, message_id: u8, response: &ParsedResponse) -> Outcome {
        let field = self.pending.as_ref().and_then(|p| p.field);

        if let ResponseData::Failure { code } = response.data {
            let failed = FailedEvent {
                code,
                description: ReturnCode::new(code).description,
                name: field.map(|f| self.field_name(&f)),
                message_id: MessageCode::new(message_id),
            };
            warn!(
                "request {:#04x} failed with code {:#04x} ({})",
                message_id,
                code,
                failed.description.unwrap_or("unknown")
            );
            self.emit(DriverEvent::Failed(failed.clone()));
            return Outcome::Failed(failed);
        }

        let kind = MessageId::from_byte(message_id);
        let status = match (kind, response.status_byte()) {
            (Some(MessageId::ProductId), _) | (_, None) => None,
            (_, Some(byte)) => Some(self.device_status(byte)),
        };

        match kind {
            Some(MessageId::ProductId) => {
                let value = decode(response.field_data(), FieldType::Text)
                    .ok()
                    .and_then(|v| v.as_text().map(str::to_string))
                    .unwrap_or_default();
                self.emit(DriverEvent::Data(DataEvent::ProductId {
                    value: value.clone(),
                }));
                Outcome::ProductId(value)
            }
            Some(MessageId::SetField | MessageId::SetAddress | MessageId::SetBaudRate) => {
                Outcome::Acknowledged { message_id }
            }
            Some(MessageId::DeviceStatus) => {
                match StatusDecoder::decode_machine_status(response.field_data()) {
                    Ok(value) => {
                        self.emit(DriverEvent::Data(DataEvent::MachineStatus {
                            status: ReturnCode::new(response.return_code),
                            value: value.clone(),
                        }));
                        Outcome::MachineStatus(value)
                    }
                    Err(e) => {
                        warn!("machine status not decoded: {}", e);
                        Outcome::Unmatched
                    }
                }
            }
            Some(MessageId::IssueCommand) => {
                let code = ReturnCode::new(response.return_code);
                self.emit(DriverEvent::Data(DataEvent::IssueCommand { status: code }));
                Outcome::CommandIssued(code)
            }
            // get-field replies are the bulk of the traffic; anything else is tried as one
            Some(MessageId::GetField | MessageId::CheckRequest) | None => match field {
                Some(field) => Outcome::Field(self.field_reading(&field, response, status)),
                None => Outcome::Unmatched,
            },
        }
    }

    fn device_status(&mut self, byte: u8) -> DeviceStatus {
        let (status, switched) = self.status.decode_device_status(byte);
        if let Some(event) = switched {
            info!(
                "switch moved {:?} -> {:?}",
                event.from.description, event.to.description
            );
            self.emit(DriverEvent::Switch(event));
        }
        status
    }

    fn field_reading(
        &mut self,
        field: &FieldDescriptor,
        response: &ParsedResponse,
        status: Option<DeviceStatus>,
    ) -> FieldReading {
        let name = self.field_name(field);
        let value = match self.catalog.decode_field(field, response.field_data()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{} ({}) not decoded: {}", name, field.field_type, e);
                None
            }
        };

        let reading = FieldReading {
            name: name.clone(),
            value,
            status,
        };
        let Some(value) = reading.value.as_ref() else {
            return reading;
        };

        if field.field_type.is_numeric() {
            if let Some(number) = value.as_f64() {
                if self.summarizer.observe(&name, number, Utc::now()) {
                    if let Some(mut summary) = self.summarizer.summary(&name) {
                        summary.status = status;
                        info!(
                            "{} delivery finished: {} -> {} ({})",
                            name, summary.meter.start, summary.meter.finish, summary.meter.total
                        );
                        self.emit(DriverEvent::Summary(summary));
                    }
                }
            }
        }

        self.emit(DriverEvent::Data(DataEvent::Field(reading.clone())));
        reading
    }
}
