//! Engine configuration
//!
//! Timeouts and line settings for one terminal session. The defaults mirror
//! the protocol's documented values: terminals acknowledge within two
//! seconds, but a cardholder interaction can legitimately take minutes, so
//! the response timeout is deliberately generous.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::transport::DEFAULT_INTER_BYTE_GAP;

/// Default time to wait for the single-byte ACK after writing a request.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Default time to wait for the final response of an exchange.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(150_000);

/// Default baud rate when no terminal family overrides it.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Configuration for a [`crate::ConnectionEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long to wait for the ACK byte after writing a request.
    pub ack_timeout: Duration,
    /// How long to wait for the final response frame of an exchange.
    pub response_timeout: Duration,
    /// Baud rate used when a connect call does not specify one.
    pub baud_rate: u32,
    /// Quiet time on the line after which buffered inbound bytes form a
    /// complete frame.
    pub inter_byte_gap: Duration,
    /// Log full frame dumps at debug level. Logging only; no behavioral
    /// effect.
    pub verbose: bool,
}

impl EngineConfig {
    /// Configuration with protocol defaults at the given baud rate.
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    /// Set the ACK timeout.
    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Enable verbose frame logging.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            baud_rate: DEFAULT_BAUD_RATE,
            inter_byte_gap: DEFAULT_INTER_BYTE_GAP,
            verbose: false,
        }
    }
}
