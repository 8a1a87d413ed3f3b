//! Transport layer: the physical or virtual serial line
//!
//! The engine only needs four capabilities from a transport: open, close,
//! raw byte writes, and a notification stream that groups inbound bytes into
//! discrete frames after a quiet gap on the line. Everything protocol-shaped
//! (envelopes, ACKs, timeouts) lives above this seam, which keeps the
//! transport swappable for a scripted mock in tests.

mod serial;

pub use serial::{list_ports, SerialFactory, SerialLink, DEFAULT_INTER_BYTE_GAP};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Opening the port failed
    #[error("failed to open port {port}: {reason}")]
    OpenFailed {
        /// Port identifier that was attempted
        port: String,
        /// Underlying failure description
        reason: String,
    },

    /// Port enumeration failed
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// The transport is not open
    #[error("transport is not open")]
    NotOpen,

    /// I/O error on the open line
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inbound notifications from an open transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One frame, delimited by the inter-byte quiet gap.
    Frame(Bytes),
    /// The line closed, solicited or not. Emitted exactly once per session.
    Closed,
}

/// Information about an enumerable serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port identifier (e.g. `COM3`, `/dev/ttyACM0`)
    pub name: String,
    /// USB manufacturer string, when known
    pub manufacturer: Option<String>,
    /// USB product string, when known
    pub product: Option<String>,
    /// Device serial number, when known
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Port info carrying only a name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

/// A half-duplex byte line with frame-grouped inbound notifications.
#[async_trait]
pub trait Transport: Send {
    /// Open the line. Frames start flowing to subscribers once open.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Close the line. Subscribers observe [`TransportEvent::Closed`].
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Write raw bytes to the line.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to inbound frame/close notifications. No replay: only
    /// events after the subscription are delivered.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Whether the line is currently open.
    fn is_open(&self) -> bool;
}

/// Creates transports and enumerates candidate ports.
///
/// The engine owns one factory; `connect` asks it for a transport bound to a
/// specific port, `autoconnect` asks it which ports exist.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport for the given port, not yet opened.
    fn create(&self, port: &str, baud_rate: u32) -> Box<dyn Transport>;

    /// Enumerate available ports, in a stable order.
    async fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError>;
}
