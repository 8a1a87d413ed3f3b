//! Protocol core: framing, transport, engine, and the profile seam

pub mod engine;
pub mod events;
pub mod framing;
pub mod profile;
pub mod response_codes;
pub mod transport;

pub use engine::{ConnectionEngine, EngineError, EngineState};
pub use events::{EventRegistry, PortEvent, SubscriptionId};
pub use profile::{CommandProfile, Fields, FrameClass, ResponseEnvelope};
pub use response_codes::ResponseCodes;
pub use transport::{
    PortInfo, SerialFactory, SerialLink, Transport, TransportError, TransportEvent,
    TransportFactory,
};
