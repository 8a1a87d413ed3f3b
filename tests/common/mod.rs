#![allow(dead_code)]

//! Scripted transport for driving the engine without hardware.
//!
//! A [`MockLine`] stands in for one serial port: tests script how the fake
//! terminal reacts to each write, and every reaction is delivered through the
//! same broadcast channel a real transport would use, so timing is
//! deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use poslink::core::framing;
use poslink::{PortInfo, Transport, TransportError, TransportEvent, TransportFactory};

static TRACING: Once = Once::new();

/// Install the fmt subscriber once per test binary so `RUST_LOG=poslink=trace`
/// surfaces engine logs in test output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// What the fake terminal does in reaction to one write.
pub type WriteScript = Box<dyn FnMut(&[u8]) -> Vec<TransportEvent> + Send>;

/// An inbound ACK, as the terminal would send it.
pub fn ack_event() -> TransportEvent {
    TransportEvent::Frame(Bytes::from_static(&[framing::ACK]))
}

/// An inbound data frame carrying `payload`.
pub fn frame_event(payload: &str) -> TransportEvent {
    TransportEvent::Frame(framing::encode(payload))
}

/// The line dropping, as an unplugged cable would look.
pub fn closed_event() -> TransportEvent {
    TransportEvent::Closed
}

/// Shared state of one fake port. The factory hands the same line to every
/// transport created for the port name, so tests keep a handle after the
/// engine connects.
pub struct MockLine {
    events: broadcast::Sender<TransportEvent>,
    open: AtomicBool,
    fail_open: AtomicBool,
    open_attempts: AtomicUsize,
    writes: Mutex<Vec<Vec<u8>>>,
    script: Mutex<Option<WriteScript>>,
}

impl MockLine {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            open_attempts: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            script: Mutex::new(None),
        })
    }

    /// Make every open attempt on this line fail.
    pub fn refuse_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Number of open attempts seen so far.
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Script the terminal's reaction to each write.
    pub fn on_write(&self, script: impl FnMut(&[u8]) -> Vec<TransportEvent> + Send + 'static) {
        *self.script.lock() = Some(Box::new(script));
    }

    /// Script a terminal that ACKs every data frame and replies to each with
    /// the next payload from `replies` (once exhausted, only ACKs).
    pub fn ack_then_reply<S: AsRef<str>>(&self, replies: Vec<S>) {
        let mut replies: std::collections::VecDeque<String> = replies
            .into_iter()
            .map(|reply| reply.as_ref().to_string())
            .collect();
        self.on_write(move |data| {
            if data == [framing::ACK] {
                return Vec::new();
            }
            let mut events = vec![ack_event()];
            if let Some(reply) = replies.pop_front() {
                events.push(frame_event(&reply));
            }
            events
        });
    }

    /// Script a terminal that only ever ACKs.
    pub fn ack_everything(&self) {
        self.on_write(|data| {
            if data == [framing::ACK] {
                Vec::new()
            } else {
                vec![ack_event()]
            }
        });
    }

    /// Push events to the engine outside any write reaction.
    pub fn emit(&self, event: TransportEvent) {
        if matches!(event, TransportEvent::Closed) {
            self.open.store(false, Ordering::SeqCst);
        }
        let _ = self.events.send(event);
    }

    /// Payloads the engine wrote, decoded; the bare ACK byte shows up as an
    /// empty string.
    pub fn sent_payloads(&self) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .map(|frame| framing::decode(frame))
            .collect()
    }

    /// Raw writes the engine performed.
    pub fn sent_raw(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }
}

struct MockTransport {
    line: Arc<MockLine>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.line.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.line.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed {
                port: "mock".to_string(),
                reason: "scripted open failure".to_string(),
            });
        }
        self.line.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.line.open.swap(false, Ordering::SeqCst) {
            let _ = self.line.events.send(TransportEvent::Closed);
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.line.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.line.writes.lock().push(data.to_vec());
        let reactions = {
            let mut script = self.line.script.lock();
            match script.as_mut() {
                Some(script) => script(data),
                None => Vec::new(),
            }
        };
        for event in reactions {
            self.line.emit(event);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.line.events.subscribe()
    }

    fn is_open(&self) -> bool {
        self.line.open.load(Ordering::SeqCst)
    }
}

/// Factory over a fixed set of fake ports.
#[derive(Default)]
pub struct MockFactory {
    lines: Mutex<HashMap<String, Arc<MockLine>>>,
    ports: Mutex<Vec<PortInfo>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    /// The shared line behind a port name, created on first use.
    pub fn line(&self, port: &str) -> Arc<MockLine> {
        self.lines
            .lock()
            .entry(port.to_string())
            .or_insert_with(MockLine::new)
            .clone()
    }

    /// Add a port to the enumeration.
    pub fn add_port(&self, name: &str) -> Arc<MockLine> {
        self.ports.lock().push(PortInfo::named(name));
        self.line(name)
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    fn create(&self, port: &str, _baud_rate: u32) -> Box<dyn Transport> {
        Box::new(MockTransport {
            line: self.line(port),
        })
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        Ok(self.ports.lock().clone())
    }
}
