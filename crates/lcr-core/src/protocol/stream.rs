//! Transport abstraction
//!
//! The protocol engine never touches a port directly. A transport accepts
//! whole frames for transmission and hands back one already-delimited reply
//! buffer per device transmission over a channel, together with its
//! lifecycle events.

use tokio::sync::mpsc;

use super::ProtocolError;

/// Events delivered by a transport, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is open; carries a human readable description
    Opened(String),
    /// One complete raw buffer received from the device
    Frame(Vec<u8>),
    /// The link closed
    Closed(String),
    /// A transport-level failure; not retried by the protocol engine
    Error(String),
}

/// Byte-stream link to the device
pub trait Transport: Send {
    /// Open the link. Lifecycle events follow on the event channel.
    fn open(&mut self) -> Result<(), ProtocolError>;

    /// Queue bytes for transmission. `Ok(false)` means the link refused them.
    fn write(&mut self, bytes: &[u8]) -> Result<bool, ProtocolError>;

    /// Hand over the receiving end of the event channel. Returns `None` once taken.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Close the link
    fn close(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), ProtocolError> {
        (**self).open()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<bool, ProtocolError> {
        (**self).write(bytes)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        (**self).take_events()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
