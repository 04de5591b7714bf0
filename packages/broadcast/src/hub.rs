//! In-process relay.
//!
//! [`RelayHub`] plays the part of the relay server: it greets every new
//! client with a `connect_success` frame and re-broadcasts every
//! well-formed frame it receives to all connected clients, the sender
//! included. Frames that are not valid JSON envelopes are logged and
//! dropped. [`HubTransport`] is the [`Transport`] that dials it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::event::{ChangeEvent, Frame};
use crate::transport::{Transport, TransportError, TransportLink, TransportSignal};

/// Greeting sent to each client on connect.
pub const WELCOME_MESSAGE: &str = "Connection established";

#[derive(Debug)]
struct HubState {
    online: bool,
    next_client: u64,
    clients: BTreeMap<u64, mpsc::UnboundedSender<TransportSignal>>,
}

/// Shared in-process relay. Cloning yields another handle to the same hub.
#[derive(Debug, Clone)]
pub struct RelayHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                online: true,
                next_client: 0,
                clients: BTreeMap::new(),
            })),
        }
    }

    /// A transport that connects to this hub.
    #[must_use]
    pub fn transport(&self) -> HubTransport {
        HubTransport { hub: self.clone() }
    }

    /// While offline, new connections are refused. Existing clients stay
    /// connected.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Closes every client link.
    pub fn disconnect_all(&self) {
        let clients = std::mem::take(&mut self.lock().clients);
        log::info!("Relay hub: closing {} client(s)", clients.len());
        for sender in clients.into_values() {
            let _ = sender.send(TransportSignal::Closed);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, endpoint: &str) -> Result<TransportLink, TransportError> {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, mut from_client) = mpsc::unbounded_channel::<String>();

        let client_id = {
            let mut state = self.lock();
            if !state.online {
                return Err(TransportError::Unreachable {
                    endpoint: endpoint.to_string(),
                    message: "relay offline".to_string(),
                });
            }
            let id = state.next_client;
            state.next_client += 1;
            state.clients.insert(id, to_client.clone());
            id
        };

        let welcome = ChangeEvent::ConnectSuccess {
            message: WELCOME_MESSAGE.to_string(),
        };
        match welcome.encode() {
            Ok(text) => {
                let _ = to_client.send(TransportSignal::Frame(text));
            }
            Err(e) => log::error!("Relay hub: failed to encode welcome: {e}"),
        }
        log::debug!("Relay hub: client {client_id} connected via {endpoint}");

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(text) = from_client.recv().await {
                hub.relay(client_id, &text);
            }
            hub.lock().clients.remove(&client_id);
            log::debug!("Relay hub: client {client_id} disconnected");
        });

        Ok(TransportLink { outgoing, incoming })
    }

    fn relay(&self, from: u64, text: &str) {
        let frame = match serde_json::from_str::<Frame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Relay hub: dropping malformed frame from client {from}: {e}");
                return;
            }
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Relay hub: failed to re-encode frame from client {from}: {e}");
                return;
            }
        };

        let mut state = self.lock();
        if !state.clients.contains_key(&from) {
            return;
        }
        state
            .clients
            .retain(|_, sender| sender.send(TransportSignal::Frame(text.clone())).is_ok());
    }
}

/// [`Transport`] that dials a [`RelayHub`]. The endpoint is only used in
/// log and error messages.
#[derive(Debug, Clone)]
pub struct HubTransport {
    hub: RelayHub,
}

#[async_trait]
impl Transport for HubTransport {
    async fn connect(&self, endpoint: &str) -> Result<TransportLink, TransportError> {
        self.hub.attach(endpoint)
    }
}
