#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Real-time change notifications between fence map clients.
//!
//! Clients announce saved changes (`fence_created`, `perimeter_updated`,
//! ...) through a shared relay so that other open views can refresh.
//! [`ChangeBroadcaster`] owns the link, reconnects with a bounded number
//! of fixed-interval attempts, and falls back to local delivery when the
//! relay cannot be reached.
//!
//! The relay link itself sits behind the [`Transport`] trait.
//! [`RelayHub`] is an in-process relay with the same fan-out behaviour as
//! the relay server.

pub mod broadcaster;
pub mod event;
pub mod hub;
pub mod transport;

use std::time::Duration;

use thiserror::Error;

pub use broadcaster::{ChangeBroadcaster, ConnectionState, Listener, Subscription};
pub use event::{ChangeEvent, EventKind, Frame};
pub use hub::{HubTransport, RelayHub};
pub use transport::{Transport, TransportError, TransportLink, TransportSignal};

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:5173";

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Errors encoding or validating frames.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The event could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame is not JSON, or its payload does not match its type.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// The frame names an event type this client does not accept.
    #[error("unknown event type: {kind}")]
    UnknownEvent {
        /// The `type` field of the rejected frame.
        kind: String,
    },
}

/// Relay connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Relay endpoint to connect to.
    pub endpoint: String,
    /// Fixed delay between reconnection attempts.
    pub reconnect_interval: Duration,
    /// Reconnection attempts before `reconnect_failed` is dispatched.
    pub max_reconnect_attempts: u32,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RELAY_URL.to_string(),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl BroadcasterConfig {
    /// Reads settings from the environment, falling back to defaults.
    ///
    /// * `FENCE_MAP_RELAY_URL`
    /// * `FENCE_MAP_RECONNECT_INTERVAL_MS`
    /// * `FENCE_MAP_MAX_RECONNECT_ATTEMPTS`
    #[must_use]
    pub fn from_env() -> Self {
        let endpoint =
            std::env::var("FENCE_MAP_RELAY_URL").unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());
        let interval_ms = std::env::var("FENCE_MAP_RECONNECT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RECONNECT_INTERVAL_MS);
        let max_reconnect_attempts = std::env::var("FENCE_MAP_MAX_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);

        Self {
            endpoint,
            reconnect_interval: Duration::from_millis(interval_ms),
            max_reconnect_attempts,
        }
    }
}
