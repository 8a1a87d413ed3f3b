//! Connection engine: session lifecycle and request arbitration
//!
//! One [`ConnectionEngine`] owns one serial session with a terminal and
//! serializes every exchange over it. The wire discipline is strict
//! request/response: the engine writes a framed request, expects the bare ACK
//! byte within the ACK timeout, then waits for the response frame within the
//! response timeout. Terminals cannot interleave requests, so at most one
//! exchange is in flight; a second send while one is pending is rejected
//! immediately rather than queued.
//!
//! Establishing a session writes a fire-and-forget poll to prove the device
//! at the other end actually speaks the protocol; a port that opens but never
//! acknowledges is not a terminal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::core::events::{EventRegistry, PortEvent, SubscriptionId};
use crate::core::framing;
use crate::core::profile::{CommandProfile, FrameClass, ResponseEnvelope};
use crate::core::transport::{
    PortInfo, SerialFactory, Transport, TransportError, TransportEvent, TransportFactory,
};

use thiserror::Error;

/// Poll command written during connect to verify a terminal is listening.
const POLL_COMMAND: &str = "0100";

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// Another connect or autoconnect attempt is already running
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    /// A caller-supplied argument was rejected before touching the line
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The session could not be established
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The operation requires an established session
    #[error("not connected to a terminal")]
    NotConnected,

    /// A request is already awaiting its response
    #[error("another request is already in flight")]
    RequestInFlight,

    /// The terminal did not acknowledge the request in time
    #[error("terminal did not acknowledge within {0:?}")]
    AckTimeout(std::time::Duration),

    /// The terminal acknowledged but never answered
    #[error("terminal did not respond within {0:?}")]
    ResponseTimeout(std::time::Duration),

    /// Writing the request to the line failed
    #[error("failed to write to the terminal: {0}")]
    TransportWriteFailed(#[source] TransportError),

    /// The line closed while a request was pending
    #[error("connection closed while a request was pending")]
    Disconnected,

    /// Transport-level failure outside an exchange
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Session state, observable at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No session.
    Disconnected,
    /// A connect attempt is running; the poll has not completed.
    Connecting,
    /// The terminal answered the poll; requests may be sent.
    Connected,
}

struct Shared {
    state: RwLock<EngineState>,
    port: RwLock<Option<String>>,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    in_flight: Mutex<bool>,
    connect_gate: tokio::sync::Mutex<()>,
    events: EventRegistry,
    // True between the Opened and Closed lifecycle events; guarantees
    // exactly one Closed per announced session whichever teardown path runs
    // first.
    announced: AtomicBool,
    // Bumped per session so a stale close watcher cannot tear down a newer
    // session.
    generation: AtomicU64,
}

impl Shared {
    fn announce_closed(&self) {
        if self.announced.swap(false, Ordering::SeqCst) {
            self.events.emit(&PortEvent::Closed);
        }
    }
}

/// Releases the single in-flight slot when the exchange ends, normally or
/// not.
struct InFlightGuard {
    shared: Arc<Shared>,
}

impl InFlightGuard {
    fn acquire(shared: Arc<Shared>) -> Result<Self, EngineError> {
        let mut slot = shared.in_flight.lock();
        if *slot {
            return Err(EngineError::RequestInFlight);
        }
        *slot = true;
        drop(slot);
        Ok(Self { shared })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        *self.shared.in_flight.lock() = false;
    }
}

/// Client-side protocol engine for one terminal session.
pub struct ConnectionEngine {
    config: EngineConfig,
    profile: Arc<dyn CommandProfile>,
    factory: Arc<dyn TransportFactory>,
    shared: Arc<Shared>,
}

impl ConnectionEngine {
    /// Engine speaking the given dialect over real serial ports.
    pub fn new(profile: Arc<dyn CommandProfile>, config: EngineConfig) -> Self {
        let factory = Arc::new(SerialFactory::new(config.inter_byte_gap));
        Self::with_factory(profile, config, factory)
    }

    /// Engine with a custom transport factory, used for tests and for
    /// non-serial lines.
    pub fn with_factory(
        profile: Arc<dyn CommandProfile>,
        config: EngineConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            profile,
            factory,
            shared: Arc::new(Shared {
                state: RwLock::new(EngineState::Disconnected),
                port: RwLock::new(None),
                transport: tokio::sync::Mutex::new(None),
                in_flight: Mutex::new(false),
                connect_gate: tokio::sync::Mutex::new(()),
                events: EventRegistry::new(),
                announced: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current session state.
    pub fn state(&self) -> EngineState {
        *self.shared.state.read()
    }

    /// Whether a session is established.
    pub fn is_connected(&self) -> bool {
        self.state() == EngineState::Connected
    }

    /// Port the current session is bound to, if any.
    pub fn connected_port(&self) -> Option<String> {
        self.shared.port.read().clone()
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<PortEvent>) {
        self.shared.events.subscribe()
    }

    /// Remove a lifecycle event subscription.
    pub fn unsubscribe_events(&self, id: SubscriptionId) {
        self.shared.events.unsubscribe(id)
    }

    /// Establish a session on the named port.
    ///
    /// Overlapping attempts are rejected with
    /// [`EngineError::AlreadyConnecting`]. When already connected, the
    /// current session is torn down first. The attempt succeeds only once
    /// the terminal acknowledges a poll; a port that opens but stays silent
    /// is closed again and reported as [`EngineError::ConnectFailed`].
    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<(), EngineError> {
        let _gate = self
            .shared
            .connect_gate
            .try_lock()
            .map_err(|_| EngineError::AlreadyConnecting)?;
        self.connect_locked(port, baud_rate).await
    }

    async fn connect_locked(&self, port: &str, baud_rate: u32) -> Result<(), EngineError> {
        if self.is_connected() {
            debug!("already connected, closing the current session first");
            let _ = self.close_session().await;
        }
        if port.is_empty() {
            return Err(EngineError::InvalidArgument("port name must not be empty"));
        }

        debug!(port, baud_rate, profile = self.profile.name(), "connecting");
        *self.shared.state.write() = EngineState::Connecting;

        let mut transport = self.factory.create(port, baud_rate);
        if let Err(e) = transport.open().await {
            *self.shared.state.write() = EngineState::Disconnected;
            return Err(EngineError::ConnectFailed(e.to_string()));
        }

        let notifications = transport.subscribe();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.transport.lock().await = Some(transport);
        self.spawn_close_watcher(notifications, generation);

        // The open alone proves nothing; only an acknowledged poll does.
        match self.exchange(POLL_COMMAND, false, None).await {
            Ok(_) => {
                *self.shared.state.write() = EngineState::Connected;
                *self.shared.port.write() = Some(port.to_string());
                debug!(port, "terminal session established");
                self.shared.announced.store(true, Ordering::SeqCst);
                self.shared.events.emit(&PortEvent::Opened {
                    port: port.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                debug!(port, error = %e, "terminal did not answer the poll");
                let _ = self.close_session().await;
                Err(EngineError::ConnectFailed(format!(
                    "terminal did not answer the poll: {e}"
                )))
            }
        }
    }

    /// Connect to the first enumerated port hosting a responsive terminal.
    ///
    /// Ports are tried in enumeration order; the first successful session
    /// wins and no further ports are probed. Returns `Ok(None)` when no port
    /// hosts a terminal, or when another connect attempt is already running.
    pub async fn autoconnect(&self, baud_rate: u32) -> Result<Option<PortInfo>, EngineError> {
        let Ok(_gate) = self.shared.connect_gate.try_lock() else {
            debug!("connect already in progress, autoconnect yields");
            return Ok(None);
        };

        let ports = self.factory.list_ports().await?;
        debug!(count = ports.len(), "probing enumerated ports");
        for port in ports {
            match self.connect_locked(&port.name, baud_rate).await {
                Ok(()) => return Ok(Some(port)),
                Err(e) => trace!(port = %port.name, error = %e, "port is not a terminal"),
            }
        }
        debug!("no responsive terminal found");
        Ok(None)
    }

    /// Tear down the session. Resolves `Ok(true)` even when nothing was
    /// open; close failures on an open line propagate.
    pub async fn disconnect(&self) -> Result<bool, EngineError> {
        self.close_session().await
    }

    async fn close_session(&self) -> Result<bool, EngineError> {
        let mut slot = self.shared.transport.lock().await;
        match slot.as_mut() {
            None => Ok(true),
            Some(transport) => {
                if transport.is_open() {
                    transport.close().await?;
                }
                *slot = None;
                drop(slot);
                *self.shared.state.write() = EngineState::Disconnected;
                *self.shared.port.write() = None;
                self.shared.announce_closed();
                Ok(true)
            }
        }
    }

    /// Write a request and wait for its final response frame.
    ///
    /// Intermediate-classified frames received meanwhile are discarded; use
    /// [`send_with_status`](Self::send_with_status) to observe them.
    pub async fn send(&self, payload: &str) -> Result<ResponseEnvelope, EngineError> {
        self.send_with_status(payload, None).await
    }

    /// Write a request, forwarding intermediate-classified frames to the
    /// given channel until the final response arrives.
    pub async fn send_with_status(
        &self,
        payload: &str,
        intermediate: Option<&mpsc::UnboundedSender<ResponseEnvelope>>,
    ) -> Result<ResponseEnvelope, EngineError> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        match self.exchange(payload, true, intermediate).await? {
            Some(envelope) => Ok(envelope),
            // Unreachable: an expected exchange only resolves with a frame.
            None => Err(EngineError::Disconnected),
        }
    }

    /// Write a request that the terminal only acknowledges, never answers.
    /// Resolves once the ACK byte arrives.
    pub async fn send_no_response(&self, payload: &str) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        self.exchange(payload, false, None).await.map(|_| ())
    }

    /// One exchange on the line: write, await ACK, optionally await the
    /// final frame. Holds the single in-flight slot for its whole duration.
    async fn exchange(
        &self,
        payload: &str,
        expect_response: bool,
        intermediate: Option<&mpsc::UnboundedSender<ResponseEnvelope>>,
    ) -> Result<Option<ResponseEnvelope>, EngineError> {
        let _guard = InFlightGuard::acquire(self.shared.clone())?;

        let frame = framing::encode(payload);
        self.log_frame("request", &frame);

        // Subscribe before writing so a fast reply cannot slip past.
        let mut notifications = {
            let mut slot = self.shared.transport.lock().await;
            let transport = slot.as_mut().ok_or(EngineError::NotConnected)?;
            let notifications = transport.subscribe();
            transport
                .write(&frame)
                .await
                .map_err(EngineError::TransportWriteFailed)?;
            notifications
        };

        let ack_timer = tokio::time::sleep(self.config.ack_timeout);
        let response_timer = tokio::time::sleep(self.config.response_timeout);
        tokio::pin!(ack_timer, response_timer);
        let mut acked = false;

        loop {
            tokio::select! {
                _ = &mut ack_timer, if !acked => {
                    warn!(payload, "no ACK from the terminal");
                    return Err(EngineError::AckTimeout(self.config.ack_timeout));
                }
                _ = &mut response_timer => {
                    warn!(payload, "no response from the terminal");
                    return Err(EngineError::ResponseTimeout(self.config.response_timeout));
                }
                event = notifications.recv() => match event {
                    Ok(TransportEvent::Frame(bytes)) => {
                        self.log_frame("inbound", &bytes);
                        if framing::is_ack(&bytes) {
                            acked = true;
                            if !expect_response {
                                return Ok(None);
                            }
                            continue;
                        }

                        // Every data frame gets a courtesy ACK, even ones we
                        // cannot make sense of; the terminal retries
                        // otherwise.
                        self.write_ack().await;

                        let envelope = ResponseEnvelope::from_frame(bytes);
                        match self.profile.classify(&envelope.function_code) {
                            FrameClass::Intermediate => {
                                trace!(code = %envelope.function_code, "intermediate frame");
                                if let Some(tx) = intermediate {
                                    let _ = tx.send(envelope);
                                }
                            }
                            FrameClass::Ack | FrameClass::Final => return Ok(Some(envelope)),
                        }
                    }
                    Ok(TransportEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                        return Err(EngineError::Disconnected);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "frame notifications lagged");
                    }
                },
            }
        }
    }

    /// Best-effort ACK write; an ACK that cannot be written is not worth
    /// failing the pending exchange over.
    async fn write_ack(&self) {
        let mut slot = self.shared.transport.lock().await;
        if let Some(transport) = slot.as_mut() {
            if let Err(e) = transport.write(&[framing::ACK]).await {
                warn!(error = %e, "could not write ACK");
            }
        }
    }

    /// Watch the transport for its close notification; an unsolicited close
    /// (cable pulled, device powered off) must reset the session and notify
    /// observers just like an explicit disconnect.
    fn spawn_close_watcher(
        &self,
        mut notifications: broadcast::Receiver<TransportEvent>,
        generation: u64,
    ) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(TransportEvent::Frame(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Ok(TransportEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                        if shared.generation.load(Ordering::SeqCst) != generation {
                            // A newer session replaced this one; nothing left
                            // to clean up here.
                            break;
                        }
                        debug!("transport closed");
                        *shared.state.write() = EngineState::Disconnected;
                        *shared.port.write() = None;
                        *shared.transport.lock().await = None;
                        shared.announce_closed();
                        break;
                    }
                }
            }
        });
    }

    fn log_frame(&self, direction: &str, frame: &[u8]) {
        if self.config.verbose {
            debug!(direction, frame = %framing::printable(frame), "frame");
        } else {
            trace!(direction, frame = %framing::printable(frame), "frame");
        }
    }
}
