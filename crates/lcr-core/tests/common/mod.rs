//! Scripted in-memory transport shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use lcr_core::protocol::{Packet, ProtocolError, Transport, TransportEvent};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub const NODE: u8 = 0x00;
pub const HOST: u8 = 0xFF;

/// Route library logs to the test harness; `RUST_LOG=debug` shows frame traffic
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Answers every write with the next scripted reply
pub struct MockTransport {
    replies: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    tx: mpsc::UnboundedSender<TransportEvent>,
    rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    opened: bool,
}

impl MockTransport {
    pub fn new(replies: Vec<Vec<u8>>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            replies: replies.into(),
            sent: sent.clone(),
            tx,
            rx: Some(rx),
            opened: false,
        };
        (transport, sent)
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), ProtocolError> {
        self.opened = true;
        let _ = self.tx.send(TransportEvent::Opened("mock".to_string()));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<bool, ProtocolError> {
        if !self.opened {
            return Ok(false);
        }
        self.sent.lock().unwrap().push(bytes.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            let _ = self.tx.send(TransportEvent::Frame(reply));
        }
        Ok(true)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.rx.take()
    }

    fn close(&mut self) {
        self.opened = false;
        let _ = self.tx.send(TransportEvent::Closed("mock".to_string()));
    }
}

/// Raw reply frame from the device to the host, stuffed the way the device sends it
pub fn reply(payload: &[u8]) -> Vec<u8> {
    Packet {
        to: HOST,
        from: NODE,
        status: 0x00,
        data: payload.to_vec(),
    }
    .to_bytes()
}

/// Successful get-field reply carrying a device status byte
pub fn field_reply(status: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x00, status];
    payload.extend_from_slice(data);
    reply(&payload)
}

/// Successful reply carrying a big-endian i32
pub fn volume_reply(status: u8, value: i32) -> Vec<u8> {
    field_reply(status, &value.to_be_bytes())
}

/// "Request queued" reply
pub fn queued() -> Vec<u8> {
    reply(&[0x26])
}

/// Status byte (offset 4) of a sent frame
pub fn status_of(frame: &[u8]) -> u8 {
    frame[4]
}

/// Message id (offset 6) of a sent frame
pub fn message_of(frame: &[u8]) -> u8 {
    frame[6]
}
