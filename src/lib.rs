//! # poslink
//!
//! Client-side protocol engine for serial payment terminals.
//!
//! A terminal speaks a strict request/response dialect over a serial line:
//! every message travels inside an `STX | payload | ETX | LRC` envelope, the
//! receiver acknowledges each frame with a bare ACK byte, and exactly one
//! request may be in flight at a time. This crate implements that discipline
//! once, in [`ConnectionEngine`], and layers the terminal command families on
//! top of it in [`pos`].
//!
//! ## Quick start
//!
//! ```no_run
//! use poslink::pos::PosIntegrado;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pos = PosIntegrado::new();
//!     if let Some(port) = pos.autoconnect().await? {
//!         println!("terminal found on {}", port.name);
//!         let response = pos.sale(1000, 123, false, None).await?;
//!         println!("approved: {}", response.successful);
//!         pos.disconnect().await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! - [`crate::core::framing`]: the wire envelope and LRC checksum
//! - [`crate::core::transport`]: the serial line, with inbound bytes grouped
//!   into frames by a quiet-gap heuristic
//! - [`ConnectionEngine`]: session lifecycle, ACK arbitration, two-tier
//!   timeouts, and the single in-flight request rule
//! - [`pos`]: the `PosIntegrado` and `PosAutoservicio` command families,
//!   which encode requests and decode positional responses

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod pos;

pub use crate::config::EngineConfig;
pub use crate::core::{
    CommandProfile, ConnectionEngine, EngineError, EngineState, Fields, FrameClass, PortEvent,
    PortInfo, ResponseCodes, ResponseEnvelope, SerialFactory, SubscriptionId, Transport,
    TransportError, TransportEvent, TransportFactory,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
