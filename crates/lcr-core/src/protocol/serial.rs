//! Serial port handling
//!
//! Port discovery and the `tokio-serial` backed [`SerialTransport`], which
//! delimits inbound bytes into frames by an inter-byte timeout.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ProtocolError, Transport, TransportEvent, DEFAULT_INTER_BYTE_TIMEOUT_MS};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor/product id, if the port is a USB adapter
    pub usb_id: Option<(u16, u16)>,
    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                usb_id: Some((usb.vid, usb.pid)),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                usb_id: None,
                product: None,
            },
        }
    }
}

/// USB-serial adapters (ttyUSB) first, then CDC devices (ttyACM), then the rest
fn port_rank(name: &str) -> (u8, usize, String) {
    let base = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyUSB"), (1, "ttyACM")] {
        if let Some(n) = base.strip_prefix(prefix) {
            return (rank, n.parse().unwrap_or(usize::MAX), base.to_string());
        }
    }
    (2, 0, base.to_string())
}

/// List available serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: BTreeMap<String, PortInfo> = BTreeMap::new();
    match serialport::available_ports() {
        Ok(found) => {
            for info in found {
                let port = PortInfo::from(info);
                ports.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => warn!("serial port enumeration failed: {}", e),
    }

    let mut ports: Vec<PortInfo> = ports.into_values().collect();
    ports.sort_by_key(|p| port_rank(&p.name));
    ports
}

/// Serial link to an LCR register
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    inter_byte_timeout: Duration,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    cancel: CancellationToken,
}

impl SerialTransport {
    /// Create a transport for `port_name` (not opened yet)
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            port_name: port_name.into(),
            baud_rate,
            inter_byte_timeout: Duration::from_millis(DEFAULT_INTER_BYTE_TIMEOUT_MS),
            outgoing: None,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Silence that terminates a received frame
    pub fn with_inter_byte_timeout(mut self, timeout: Duration) -> Self {
        self.inter_byte_timeout = timeout;
        self
    }

    fn open_stream(&self) -> Result<SerialStream, ProtocolError> {
        tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), ProtocolError> {
        if self.outgoing.is_some() {
            return Ok(());
        }

        let stream = self.open_stream()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);
        self.cancel = CancellationToken::new();

        tokio::spawn(run_io(
            stream,
            rx,
            self.events_tx.clone(),
            self.inter_byte_timeout,
            self.cancel.clone(),
            self.port_name.clone(),
        ));

        let message = format!(
            "Connected to: {} baudrate: {}bps",
            self.port_name, self.baud_rate
        );
        info!("{}", message);
        let _ = self.events_tx.send(TransportEvent::Opened(message));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<bool, ProtocolError> {
        let outgoing = self.outgoing.as_ref().ok_or(ProtocolError::NotConnected)?;
        Ok(outgoing.send(bytes.to_vec()).is_ok())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    fn close(&mut self) {
        self.cancel.cancel();
        self.outgoing = None;
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Port I/O task: writes queued frames and cuts inbound bytes into frames
async fn run_io(
    stream: SerialStream,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    inter_byte_timeout: Duration,
    cancel: CancellationToken,
    port_name: String,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buffer = [0u8; 256];
    let mut frame: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = events.send(TransportEvent::Closed(format!("{} is closed", port_name)));
                break;
            }
            queued = outgoing.recv() => {
                let Some(bytes) = queued else {
                    let _ = events.send(TransportEvent::Closed(format!("{} is closed", port_name)));
                    break;
                };
                debug!("serial write {} bytes: {:02x?}", bytes.len(), bytes);
                if let Err(e) = writer.write_all(&bytes).await {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                }
            }
            read = reader.read(&mut buffer) => match read {
                Ok(0) => {
                    let _ = events.send(TransportEvent::Closed(format!("{} is closed", port_name)));
                    break;
                }
                Ok(n) => frame.extend_from_slice(&buffer[..n]),
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    let _ = events.send(TransportEvent::Closed(format!("{} is closed", port_name)));
                    break;
                }
            },
            _ = tokio::time::sleep(inter_byte_timeout), if !frame.is_empty() => {
                debug!("serial frame {} bytes: {:02x?}", frame.len(), frame);
                let _ = events.send(TransportEvent::Frame(std::mem::take(&mut frame)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        for port in list_ports() {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_ordering() {
        let mut names = vec![
            "/dev/ttyACM0",
            "/dev/ttyUSB10",
            "/dev/ttyS0",
            "/dev/ttyUSB2",
        ];
        names.sort_by_key(|n| port_rank(n));
        assert_eq!(
            names,
            vec!["/dev/ttyUSB2", "/dev/ttyUSB10", "/dev/ttyACM0", "/dev/ttyS0"]
        );
    }

    #[tokio::test]
    async fn test_write_before_open_is_rejected() {
        let mut transport = SerialTransport::new("/dev/does-not-exist", 19200);
        assert!(matches!(
            transport.write(&[0x7E]),
            Err(ProtocolError::NotConnected)
        ));
        assert!(transport.take_events().is_some());
        assert!(transport.take_events().is_none());
    }
}
