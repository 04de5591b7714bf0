//! Duplex channel seam between the broadcaster and a relay.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Something the transport reports to the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// A text frame from the relay.
    Frame(String),
    /// A non-fatal transport error.
    Error(String),
    /// The link was closed by the remote side.
    Closed,
}

/// An established link. Dropping `outgoing` closes the link from the
/// client side; `incoming` ends (or yields [`TransportSignal::Closed`])
/// when the remote side goes away.
#[derive(Debug)]
pub struct TransportLink {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<TransportSignal>,
}

/// Errors establishing or using a link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The relay could not be reached.
    #[error("relay at {endpoint} unreachable: {message}")]
    Unreachable {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Reason reported by the transport.
        message: String,
    },

    /// The link was already closed.
    #[error("link closed")]
    Closed,
}

/// Opens links to a relay endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the link cannot be established.
    async fn connect(&self, endpoint: &str) -> Result<TransportLink, TransportError>;
}
