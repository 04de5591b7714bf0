//! Connection-managing change broadcaster.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt as _;
use futures::future::BoxFuture;
use strum_macros::{AsRefStr, Display};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::BroadcasterConfig;
use crate::event::{ChangeEvent, EventKind};
use crate::transport::{Transport, TransportLink, TransportSignal};

/// Listener callback. Invoked synchronously on the dispatching task.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Link {
    state: ConnectionState,
    endpoint: Option<String>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    attempts: u32,
    gave_up: bool,
    /// Bumped by every manual `connect`/`disconnect` so stale tasks can
    /// tell they have been superseded.
    generation: u64,
}

impl Link {
    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
        self.outgoing = None;
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: BTreeMap<EventKind, Vec<(u64, Listener)>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: BroadcasterConfig,
    link: Mutex<Link>,
    listeners: Mutex<Listeners>,
}

impl Inner {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, event: &ChangeEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .listeners()
            .by_kind
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        log::trace!("Dispatching {kind} to {} listener(s)", listeners.len());

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                log::error!("Listener for {kind} panicked");
            }
        }
    }

    fn establish(inner: Arc<Self>, generation: u64) -> BoxFuture<'static, bool> {
        async move {
            let endpoint = inner.link().endpoint.clone();
            let Some(endpoint) = endpoint else {
                return false;
            };

            match inner.transport.connect(&endpoint).await {
                Ok(TransportLink { outgoing, incoming }) => {
                    {
                        let mut link = inner.link();
                        if link.generation != generation {
                            return false;
                        }
                        link.state = ConnectionState::Connected;
                        link.attempts = 0;
                        link.gave_up = false;
                        link.outgoing = Some(outgoing);
                        link.reader = Some(tokio::spawn(Self::read(
                            Arc::downgrade(&inner),
                            incoming,
                            generation,
                        )));
                    }
                    log::info!("Connected to relay at {endpoint}");
                    inner.dispatch(&ChangeEvent::Connect);
                    true
                }
                Err(e) => {
                    {
                        let mut link = inner.link();
                        if link.generation != generation {
                            return false;
                        }
                        link.state = ConnectionState::Disconnected;
                    }
                    log::warn!("Failed to connect to relay: {e}");
                    inner.dispatch(&ChangeEvent::Error {
                        message: e.to_string(),
                    });
                    Self::schedule_reconnect(&inner, generation);
                    false
                }
            }
        }
        .boxed()
    }

    async fn read(
        inner: Weak<Self>,
        mut incoming: mpsc::UnboundedReceiver<TransportSignal>,
        generation: u64,
    ) {
        while let Some(signal) = incoming.recv().await {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match signal {
                TransportSignal::Frame(text) => match ChangeEvent::decode(&text) {
                    Ok(event) => inner.dispatch(&event),
                    Err(e) => log::warn!("Dropping frame: {e}"),
                },
                TransportSignal::Error(message) => {
                    log::warn!("Transport error: {message}");
                    inner.dispatch(&ChangeEvent::Error { message });
                }
                TransportSignal::Closed => break,
            }
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        {
            let mut link = inner.link();
            if link.generation != generation || link.state != ConnectionState::Connected {
                return;
            }
            link.state = ConnectionState::Disconnected;
            link.outgoing = None;
            link.reader = None;
        }
        log::info!("Relay link closed");
        inner.dispatch(&ChangeEvent::Disconnect);
        Self::schedule_reconnect(&inner, generation);
    }

    /// Schedules one reconnection attempt after the configured interval,
    /// or gives up once the attempt budget is spent.
    fn schedule_reconnect(inner: &Arc<Self>, generation: u64) {
        let max = inner.config.max_reconnect_attempts;
        let delay = inner.config.reconnect_interval;

        let mut link = inner.link();
        if link.generation != generation || link.reconnect.is_some() {
            return;
        }

        if link.attempts >= max {
            let first = !link.gave_up;
            link.gave_up = true;
            drop(link);
            if first {
                log::error!("Giving up on relay after {max} reconnection attempt(s)");
                inner.dispatch(&ChangeEvent::ReconnectFailed);
            }
            return;
        }

        link.attempts += 1;
        let attempt = link.attempts;
        log::info!("Reconnecting in {}ms (attempt {attempt}/{max})", delay.as_millis());

        let weak = Arc::downgrade(inner);
        link.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut link = inner.link();
                if link.generation != generation {
                    return;
                }
                link.reconnect = None;
                link.state = ConnectionState::Connecting;
            }
            Self::establish(inner, generation).await;
        }));
    }
}

/// Publishes change events to a relay and fans incoming events out to
/// local listeners.
///
/// When the relay is unreachable, [`send`](Self::send) delivers the event
/// to local listeners instead, so a single client keeps working offline.
/// Lost links are retried at a fixed interval up to
/// [`BroadcasterConfig::max_reconnect_attempts`] times, after which a
/// single `reconnect_failed` event is dispatched.
pub struct ChangeBroadcaster {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChangeBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcaster")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ChangeBroadcaster {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: BroadcasterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    endpoint: None,
                    outgoing: None,
                    reader: None,
                    reconnect: None,
                    attempts: 0,
                    gave_up: false,
                    generation: 0,
                }),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BroadcasterConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.link().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnection attempts made since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.link().attempts
    }

    /// Connects to `endpoint`, replacing any existing link and cancelling
    /// any pending reconnection. Resets the reconnection budget.
    ///
    /// Failures are not returned: they are dispatched as `error` events
    /// and retried in the background. Returns whether the link came up.
    pub async fn connect(&self, endpoint: &str) -> bool {
        let generation = {
            let mut link = self.inner.link();
            link.teardown();
            link.generation += 1;
            link.attempts = 0;
            link.gave_up = false;
            link.endpoint = Some(endpoint.to_string());
            link.state = ConnectionState::Connecting;
            link.generation
        };
        log::debug!("Connecting to relay at {endpoint}");

        Inner::establish(Arc::clone(&self.inner), generation).await
    }

    /// Closes the link and cancels any pending reconnection. Safe to call
    /// repeatedly.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut link = self.inner.link();
            link.teardown();
            link.generation += 1;
            let was_connected = link.state == ConnectionState::Connected;
            link.state = ConnectionState::Disconnected;
            was_connected
        };

        if was_connected {
            log::info!("Disconnected from relay");
            self.inner.dispatch(&ChangeEvent::Disconnect);
        }
    }

    /// Publishes `event` to the relay.
    ///
    /// Returns `true` if the frame was handed to the transport. Otherwise
    /// the event is dispatched to local listeners before returning
    /// `false`.
    pub fn send(&self, event: &ChangeEvent) -> bool {
        let outgoing = {
            let link = self.inner.link();
            if link.state == ConnectionState::Connected {
                link.outgoing.clone()
            } else {
                None
            }
        };

        if let Some(outgoing) = outgoing {
            match event.encode() {
                Ok(text) => {
                    if outgoing.send(text).is_ok() {
                        return true;
                    }
                    log::warn!("Relay link closed while sending {}", event.kind());
                }
                Err(e) => log::error!("Failed to encode {}: {e}", event.kind()),
            }
        }

        log::warn!("Relay unavailable, dispatching {} locally", event.kind());
        self.inner.dispatch(event);
        false
    }

    /// Registers `listener` for events of `kind`.
    ///
    /// The registration lives as long as the returned [`Subscription`].
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut listeners = self.inner.listeners();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners
                .by_kind
                .entry(kind)
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };

        Subscription {
            inner: Arc::downgrade(&self.inner),
            kind,
            id,
            active: true,
        }
    }

    /// Removes a registration made with [`on`](Self::on).
    ///
    /// # Errors
    ///
    /// Hands the subscription back, still registered, if it was made on
    /// another broadcaster.
    pub fn off(&self, subscription: Subscription) -> Result<(), Subscription> {
        if !std::ptr::eq(subscription.inner.as_ptr(), Arc::as_ptr(&self.inner)) {
            log::debug!("Subscription for {} belongs to another broadcaster", subscription.kind);
            return Err(subscription);
        }
        drop(subscription);
        Ok(())
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners()
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Drop for ChangeBroadcaster {
    fn drop(&mut self) {
        self.inner.link().teardown();
    }
}

/// Handle to a listener registration. Dropping it unregisters the
/// listener.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    inner: Weak<Inner>,
    kind: EventKind,
    id: u64,
    active: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keeps the listener registered for the broadcaster's lifetime.
    pub fn detach(mut self) {
        self.active = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut listeners = inner.listeners();
        if let Some(entries) = listeners.by_kind.get_mut(&self.kind) {
            entries.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use fence_map_fence_models::{FenceId, PerimeterId};

    use super::*;
    use crate::hub::RelayHub;
    use crate::transport::TransportError;

    fn config(max_reconnect_attempts: u32) -> BroadcasterConfig {
        BroadcasterConfig {
            endpoint: "ws://relay".to_string(),
            reconnect_interval: Duration::from_millis(5000),
            max_reconnect_attempts,
        }
    }

    fn counter(
        broadcaster: &ChangeBroadcaster,
        kind: EventKind,
    ) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = broadcaster.on(kind, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    fn recorder(
        broadcaster: &ChangeBroadcaster,
        kind: EventKind,
    ) -> (Arc<Mutex<Vec<ChangeEvent>>>, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let sub = broadcaster.on(kind, move |event| {
            seen.lock().unwrap().push(event.clone());
        });
        (events, sub)
    }

    /// Lets spawned tasks run to quiescence under the paused clock.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    struct Unreachable {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Unreachable {
        async fn connect(&self, endpoint: &str) -> Result<TransportLink, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Unreachable {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn send_while_disconnected_dispatches_locally() {
        let hub = RelayHub::new();
        let broadcaster = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let (events, _sub) = recorder(&broadcaster, EventKind::PerimeterUpdated);

        assert!(!broadcaster.send(&ChangeEvent::PerimeterUpdated(PerimeterId(8))));
        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeEvent::PerimeterUpdated(PerimeterId(8))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connected_send_round_trips_through_the_relay() {
        let hub = RelayHub::new();
        let broadcaster = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let (welcomes, _w) = counter(&broadcaster, EventKind::ConnectSuccess);
        let (connects, _c) = counter(&broadcaster, EventKind::Connect);
        let (events, _sub) = recorder(&broadcaster, EventKind::FenceUpdated);

        assert!(broadcaster.connect("ws://relay").await);
        assert!(broadcaster.is_connected());
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        assert!(broadcaster.send(&ChangeEvent::FenceUpdated(FenceId(2))));
        assert!(events.lock().unwrap().is_empty());

        settle().await;
        assert_eq!(welcomes.load(Ordering::SeqCst), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeEvent::FenceUpdated(FenceId(2))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn events_reach_other_clients() {
        let hub = RelayHub::new();
        let editor = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let viewer = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let (events, _sub) = recorder(&viewer, EventKind::PerimeterDeleted);

        editor.connect("ws://relay").await;
        viewer.connect("ws://relay").await;
        assert_eq!(hub.client_count(), 2);

        editor.send(&ChangeEvent::PerimeterDeleted(PerimeterId(3)));
        settle().await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeEvent::PerimeterDeleted(PerimeterId(3))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_reconnect_attempts() {
        let transport = Arc::new(Unreachable {
            attempts: AtomicUsize::new(0),
        });
        let broadcaster = ChangeBroadcaster::new(transport.clone(), config(3));
        let (failed, _f) = counter(&broadcaster, EventKind::ReconnectFailed);
        let (errors, _e) = counter(&broadcaster, EventKind::Error);

        assert!(!broadcaster.connect("ws://relay").await);
        assert_eq!(broadcaster.state(), ConnectionState::Disconnected);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 4);
        assert_eq!(failed.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_resets_the_budget() {
        let transport = Arc::new(Unreachable {
            attempts: AtomicUsize::new(0),
        });
        let broadcaster = ChangeBroadcaster::new(transport.clone(), config(1));
        let (failed, _f) = counter(&broadcaster, EventKind::ReconnectFailed);

        broadcaster.connect("ws://relay").await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(failed.load(Ordering::SeqCst), 1);

        broadcaster.connect("ws://relay").await;
        assert_eq!(broadcaster.reconnect_attempts(), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(failed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_the_relay_drops() {
        let hub = RelayHub::new();
        let broadcaster = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let (connects, _c) = counter(&broadcaster, EventKind::Connect);
        let (disconnects, _d) = counter(&broadcaster, EventKind::Disconnect);

        broadcaster.connect("ws://relay").await;
        hub.disconnect_all();
        settle().await;

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.state(), ConnectionState::Disconnected);
        assert_eq!(broadcaster.reconnect_attempts(), 1);

        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert!(broadcaster.is_connected());
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(broadcaster.reconnect_attempts(), 0);
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnection() {
        let hub = RelayHub::new();
        hub.set_online(false);
        let broadcaster = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));

        broadcaster.connect("ws://relay").await;
        assert_eq!(broadcaster.reconnect_attempts(), 1);
        broadcaster.disconnect();
        broadcaster.disconnect();

        hub.set_online(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(broadcaster.state(), ConnectionState::Disconnected);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_others() {
        let hub = RelayHub::new();
        let broadcaster = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let _bad = broadcaster.on(EventKind::FenceDeleted, |_| panic!("listener failure"));
        let (count, _good) = counter(&broadcaster, EventKind::FenceDeleted);

        broadcaster.send(&ChangeEvent::FenceDeleted(FenceId(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_only_it() {
        let hub = RelayHub::new();
        let broadcaster = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let (first, first_sub) = counter(&broadcaster, EventKind::FenceCreated);
        let (second, _second_sub) = counter(&broadcaster, EventKind::FenceCreated);
        assert_eq!(broadcaster.listener_count(EventKind::FenceCreated), 2);

        broadcaster.off(first_sub).unwrap();
        assert_eq!(broadcaster.listener_count(EventKind::FenceCreated), 1);

        broadcaster.send(&ChangeEvent::FenceCreated(FenceId(1)));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_returns_subscriptions_of_other_broadcasters() {
        let hub = RelayHub::new();
        let mine = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let theirs = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let (count, sub) = counter(&theirs, EventKind::PerimeterDeleted);

        let sub = mine.off(sub).unwrap_err();
        assert_eq!(theirs.listener_count(EventKind::PerimeterDeleted), 1);
        theirs.send(&ChangeEvent::PerimeterDeleted(PerimeterId(4)));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        theirs.off(sub).unwrap();
        assert_eq!(theirs.listener_count(EventKind::PerimeterDeleted), 0);
    }

    #[tokio::test]
    async fn detached_subscription_stays_registered() {
        let hub = RelayHub::new();
        let broadcaster = ChangeBroadcaster::new(Arc::new(hub.transport()), config(10));
        let (count, sub) = counter(&broadcaster, EventKind::FenceUpdated);
        sub.detach();

        broadcaster.send(&ChangeEvent::FenceUpdated(FenceId(6)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.listener_count(EventKind::FenceUpdated), 1);
    }
}
