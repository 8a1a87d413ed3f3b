//! Serial port transport implementation
//!
//! Wraps a `tokio-serial` stream and runs a reader task that groups inbound
//! bytes into frames: once bytes stop arriving for the inter-byte gap, the
//! accumulated run is published as one [`TransportEvent::Frame`]. Terminals
//! pause well over the gap between frames, so the quiet-gap heuristic is the
//! frame delimiter on this line.

use super::{PortInfo, Transport, TransportError, TransportEvent, TransportFactory};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace, warn};

/// Quiet time on the line after which buffered bytes form a complete frame.
pub const DEFAULT_INTER_BYTE_GAP: Duration = Duration::from_millis(100);

/// Capacity of the frame notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Serial line bound to one port at one baud rate.
pub struct SerialLink {
    port_name: String,
    baud_rate: u32,
    inter_byte_gap: Duration,
    events: broadcast::Sender<TransportEvent>,
    writer: Option<WriteHalf<SerialStream>>,
    cancel: Option<mpsc::Sender<()>>,
    open: Arc<AtomicBool>,
}

impl SerialLink {
    /// Create a link for the given port, not yet opened.
    pub fn new(port_name: &str, baud_rate: u32, inter_byte_gap: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            inter_byte_gap,
            events,
            writer: None,
            cancel: None,
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Transport for SerialLink {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }

        let stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::OpenFailed {
                port: self.port_name.clone(),
                reason: e.to_string(),
            })?;
        debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");

        let (reader, writer) = tokio::io::split(stream);
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>(1);

        self.writer = Some(writer);
        self.cancel = Some(cancel_tx);
        self.open.store(true, Ordering::SeqCst);

        tokio::spawn(read_loop(
            reader,
            self.events.clone(),
            self.open.clone(),
            cancel_rx,
            self.inter_byte_gap,
        ));

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(()).await;
        }
        self.writer = None;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotOpen)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Reader task: accumulate bytes, publish a frame per quiet gap, publish
/// `Closed` exactly once on the way out.
async fn read_loop(
    mut reader: ReadHalf<SerialStream>,
    events: broadcast::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
    mut cancel_rx: mpsc::Receiver<()>,
    inter_byte_gap: Duration,
) {
    let mut scratch = [0u8; 512];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = if pending.is_empty() {
            tokio::select! {
                _ = cancel_rx.recv() => break,
                r = reader.read(&mut scratch) => Some(r),
            }
        } else {
            tokio::select! {
                _ = cancel_rx.recv() => break,
                r = tokio::time::timeout(inter_byte_gap, reader.read(&mut scratch)) => match r {
                    Ok(inner) => Some(inner),
                    Err(_) => {
                        // Quiet gap elapsed: the buffered run is one frame.
                        let frame = Bytes::from(std::mem::take(&mut pending));
                        trace!(len = frame.len(), "frame delimited by quiet gap");
                        let _ = events.send(TransportEvent::Frame(frame));
                        None
                    }
                },
            }
        };

        match read {
            None => {}
            Some(Ok(0)) => {
                debug!("serial stream reached EOF");
                break;
            }
            Some(Ok(n)) => pending.extend_from_slice(&scratch[..n]),
            Some(Err(e)) => {
                warn!(error = %e, "serial read failed, closing");
                break;
            }
        }
    }

    if !pending.is_empty() {
        let _ = events.send(TransportEvent::Frame(Bytes::from(pending)));
    }
    open.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed);
}

/// List available serial ports in enumeration order.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let mut info = PortInfo::named(&p.port_name);
            if let serialport::SerialPortType::UsbPort(usb) = p.port_type {
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
                info.serial_number = usb.serial_number;
            }
            info
        })
        .collect())
}

/// Default factory producing [`SerialLink`] transports.
#[derive(Debug, Clone)]
pub struct SerialFactory {
    inter_byte_gap: Duration,
}

impl SerialFactory {
    /// Factory with a custom inter-byte gap.
    pub fn new(inter_byte_gap: Duration) -> Self {
        Self { inter_byte_gap }
    }
}

impl Default for SerialFactory {
    fn default() -> Self {
        Self::new(DEFAULT_INTER_BYTE_GAP)
    }
}

#[async_trait]
impl TransportFactory for SerialFactory {
    fn create(&self, port: &str, baud_rate: u32) -> Box<dyn Transport> {
        Box::new(SerialLink::new(port, baud_rate, self.inter_byte_gap))
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        list_ports()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_starts_closed() {
        let link = SerialLink::new("/dev/ttyUSB0", 115200, DEFAULT_INTER_BYTE_GAP);
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_write_on_closed_link_fails() {
        let mut link = SerialLink::new("/dev/ttyUSB0", 115200, DEFAULT_INTER_BYTE_GAP);
        assert!(matches!(
            link.write(b"0100").await,
            Err(TransportError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut link = SerialLink::new("/dev/ttyUSB0", 115200, DEFAULT_INTER_BYTE_GAP);
        assert!(link.close().await.is_ok());
        assert!(link.close().await.is_ok());
    }
}
