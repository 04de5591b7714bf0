//! Refetching a fence when other clients change it.

use std::sync::Arc;

use fence_map_broadcast::{ChangeBroadcaster, EventKind, Subscription};
use fence_map_fence_models::FenceId;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::controller::Shared;

const WATCHED_KINDS: [EventKind; 4] = [
    EventKind::FenceUpdated,
    EventKind::FenceDeleted,
    EventKind::PerimeterUpdated,
    EventKind::PerimeterDeleted,
];

/// Live subscription to changes of one fence.
///
/// Fence events for other fences are ignored. Perimeter events carry no
/// fence id, so every one of them triggers a refetch. Dropping the watch
/// unregisters its listeners.
#[derive(Debug)]
pub struct FenceWatch {
    fence_id: FenceId,
    refreshes: watch::Receiver<u64>,
    _subscriptions: Vec<Subscription>,
}

impl FenceWatch {
    pub(crate) fn new(
        broadcaster: &ChangeBroadcaster,
        shared: Arc<Shared>,
        fence_id: FenceId,
    ) -> Self {
        let (tx, refreshes) = watch::channel(0_u64);
        let tx = Arc::new(tx);

        let subscriptions = WATCHED_KINDS
            .into_iter()
            .map(|kind| {
                let shared = Arc::clone(&shared);
                let tx = Arc::clone(&tx);
                broadcaster.on(kind, move |event| {
                    if event.fence_id().is_some_and(|id| id != fence_id) {
                        return;
                    }
                    let Ok(handle) = Handle::try_current() else {
                        log::warn!("Fence {fence_id}: no runtime to refetch on {}", event.kind());
                        return;
                    };

                    let shared = Arc::clone(&shared);
                    let tx = Arc::clone(&tx);
                    handle.spawn(async move {
                        match shared.refetch(fence_id).await {
                            Ok(_) => tx.send_modify(|count| *count += 1),
                            Err(e) => log::warn!("Fence {fence_id}: refetch failed: {e}"),
                        }
                    });
                })
            })
            .collect();

        log::debug!("Watching fence {fence_id}");

        Self {
            fence_id,
            refreshes,
            _subscriptions: subscriptions,
        }
    }

    #[must_use]
    pub const fn fence_id(&self) -> FenceId {
        self.fence_id
    }

    /// Number of refetches completed so far.
    #[must_use]
    pub fn refreshes(&self) -> u64 {
        *self.refreshes.borrow()
    }

    /// Waits for the next completed refetch.
    ///
    /// Returns `false` if no further refetch can happen.
    pub async fn changed(&mut self) -> bool {
        self.refreshes.changed().await.is_ok()
    }
}
