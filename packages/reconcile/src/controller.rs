//! Optimistic writes with rollback.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fence_map_broadcast::{ChangeBroadcaster, ChangeEvent};
use fence_map_editor::{DrawnPolygon, EditSession, SavedPerimeter};
use fence_map_fence_models::{
    FenceId, Geofence, NewGeofence, NewPerimeter, Perimeter, PerimeterId, PerimeterShape,
    PerimeterUpdate, Rule, RuleTemplate, StorageCoord,
};
use fence_map_geocoder::{ReverseGeocoder, annotate_address};
use fence_map_geometry::ring;
use fence_map_store::{FenceStore, StoreError};

use crate::watch::FenceWatch;
use crate::{ReconcileError, RestoreSource};

/// State shared with watch listeners.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn FenceStore>,
    cache: Mutex<BTreeMap<FenceId, Vec<Perimeter>>>,
}

impl Shared {
    fn cache(&self) -> MutexGuard<'_, BTreeMap<FenceId, Vec<Perimeter>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the local copy of a fence's perimeters with the store's.
    pub(crate) async fn refetch(&self, fence_id: FenceId) -> Result<Vec<Perimeter>, StoreError> {
        let perimeters = self.store.list_perimeters(fence_id).await?;
        self.cache().insert(fence_id, perimeters.clone());
        log::debug!(
            "Fence {fence_id}: loaded {} perimeter(s) from store",
            perimeters.len()
        );
        Ok(perimeters)
    }

    fn local_copy(&self, fence_id: FenceId) -> Option<Vec<Perimeter>> {
        self.cache().get(&fence_id).cloned()
    }

    /// Sets the local entry of `id` to `next` (removing it for `None`) if
    /// the fence is loaded. Returns what it replaced.
    fn stage(&self, fence_id: FenceId, id: PerimeterId, next: Option<Perimeter>) -> Prior {
        let mut cache = self.cache();
        let Some(perimeters) = cache.get_mut(&fence_id) else {
            return Prior::NotLoaded;
        };

        let position = perimeters.iter().position(|p| p.id == id);
        let entry = match (position, next) {
            (Some(index), Some(next)) => Some(std::mem::replace(&mut perimeters[index], next)),
            (Some(index), None) => Some(perimeters.remove(index)),
            (None, Some(next)) => {
                perimeters.push(next);
                None
            }
            (None, None) => None,
        };
        Prior::Perimeter { id, entry }
    }

    /// Replaces the staged entry `id` with the stored record.
    fn settle(&self, fence_id: FenceId, id: PerimeterId, saved: Perimeter) {
        if let Some(perimeters) = self.cache().get_mut(&fence_id) {
            match perimeters.iter_mut().find(|p| p.id == id) {
                Some(slot) => *slot = saved,
                None => perimeters.push(saved),
            }
        }
    }

    fn put_back(&self, fence_id: FenceId, prior: Prior) {
        match prior {
            Prior::NotLoaded => {}
            Prior::Perimeter { id, entry } => {
                self.stage(fence_id, id, entry);
            }
            Prior::Fence(perimeters) => {
                self.cache().entry(fence_id).or_insert(perimeters);
            }
        }
    }

    async fn restore(&self, fence_id: FenceId, prior: Prior) -> RestoreSource {
        match self.refetch(fence_id).await {
            Ok(_) => RestoreSource::Refetched,
            Err(e) => {
                log::error!("Fence {fence_id}: re-fetch failed ({e}), restoring local snapshot");
                self.put_back(fence_id, prior);
                RestoreSource::Snapshot
            }
        }
    }
}

/// Local state replaced by an optimistic change.
#[derive(Debug)]
enum Prior {
    /// The fence was not loaded, so nothing changed locally.
    NotLoaded,
    /// Previous entry of one perimeter; `None` if it was not held.
    Perimeter {
        id: PerimeterId,
        entry: Option<Perimeter>,
    },
    /// Every perimeter of the fence.
    Fence(Vec<Perimeter>),
}

/// A fence to create together with its first perimeter and default rule.
#[derive(Debug, Clone)]
pub struct NewFence {
    pub fence: NewGeofence,
    pub perimeter_name: Option<String>,
    pub polygon: DrawnPolygon,
    pub template: RuleTemplate,
}

/// Records written by [`ReconciliationController::create_fence`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedFence {
    pub geofence: Geofence,
    pub perimeter: Perimeter,
    pub rule: Rule,
}

/// Coordinates local perimeter state, the store and change broadcasts.
#[derive(Clone)]
pub struct ReconciliationController {
    shared: Arc<Shared>,
    broadcaster: Arc<ChangeBroadcaster>,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
}

impl std::fmt::Debug for ReconciliationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationController")
            .field("broadcaster", &self.broadcaster)
            .field("fences", &self.shared.cache().len())
            .field("geocoder", &self.geocoder.is_some())
            .finish_non_exhaustive()
    }
}

impl ReconciliationController {
    #[must_use]
    pub fn new(store: Arc<dyn FenceStore>, broadcaster: Arc<ChangeBroadcaster>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                cache: Mutex::new(BTreeMap::new()),
            }),
            broadcaster,
            geocoder: None,
        }
    }

    /// Enables address suggestions for drawn polygons.
    #[must_use]
    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    #[must_use]
    pub const fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.broadcaster
    }

    /// Local copy of a fence's perimeters. Empty until loaded.
    #[must_use]
    pub fn perimeters(&self, fence_id: FenceId) -> Vec<Perimeter> {
        self.shared.local_copy(fence_id).unwrap_or_default()
    }

    #[must_use]
    pub fn perimeter(&self, fence_id: FenceId, id: PerimeterId) -> Option<Perimeter> {
        self.shared
            .cache()
            .get(&fence_id)
            .and_then(|perimeters| perimeters.iter().find(|p| p.id == id).cloned())
    }

    /// Loads a fence's perimeters from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Store`] if the store cannot be read; the
    /// local copy is left as it was.
    pub async fn refresh(&self, fence_id: FenceId) -> Result<Vec<Perimeter>, ReconcileError> {
        Ok(self.shared.refetch(fence_id).await?)
    }

    /// Suggested address for a drawn polygon, or the placeholder when no
    /// geocoder is configured or the lookup fails.
    pub async fn suggest_address(&self, polygon: &DrawnPolygon) -> String {
        annotate_address(self.geocoder.as_deref(), polygon.center).await
    }

    /// Saves new geometry for a perimeter.
    ///
    /// `coordinates` may be open or closed; the stored ring is always open.
    /// A [`PerimeterId::DRAFT`] id creates a new perimeter and broadcasts
    /// `fence_updated` before `perimeter_updated`.
    ///
    /// # Errors
    ///
    /// * [`ReconcileError::Geometry`] if the ring is invalid (nothing is
    ///   changed)
    /// * [`ReconcileError::Store`] if the perimeter is not held locally and
    ///   cannot be read
    /// * [`ReconcileError::ForeignPerimeter`] if it belongs to another fence
    /// * [`ReconcileError::PersistenceFailure`] if the store rejects the
    ///   write (local state is restored)
    pub async fn save_geometry(
        &self,
        fence_id: FenceId,
        perimeter_id: PerimeterId,
        coordinates: &[StorageCoord],
    ) -> Result<Perimeter, ReconcileError> {
        let opened = ring::open_ring(coordinates);
        ring::validate(&opened)?;
        let shape = PerimeterShape::Polygon {
            coordinates: opened,
        };

        let staged = if perimeter_id.is_draft() {
            Perimeter {
                id: perimeter_id,
                fence_id,
                name: None,
                shape,
                created_at: Utc::now(),
            }
        } else {
            Perimeter {
                shape,
                ..self.current(fence_id, perimeter_id).await?
            }
        };
        let prior = self
            .shared
            .stage(fence_id, perimeter_id, Some(staged.clone()));

        let store = &self.shared.store;
        let result = if perimeter_id.is_draft() {
            store
                .create_perimeter(NewPerimeter {
                    fence_id,
                    name: staged.name,
                    shape: staged.shape,
                    created_at: staged.created_at,
                })
                .await
        } else {
            store
                .update_perimeter(
                    perimeter_id,
                    PerimeterUpdate {
                        name: staged.name,
                        shape: staged.shape,
                    },
                )
                .await
        };

        match result {
            Ok(saved) => {
                self.shared.settle(fence_id, perimeter_id, saved.clone());
                log::info!("Fence {fence_id}: saved perimeter {}", saved.id);
                if perimeter_id.is_draft() {
                    self.broadcast(&ChangeEvent::FenceUpdated(fence_id));
                }
                self.broadcast(&ChangeEvent::PerimeterUpdated(saved.id));
                Ok(saved)
            }
            Err(source) => Err(self.rollback(fence_id, prior, source).await),
        }
    }

    /// Saves an edit session's draft.
    ///
    /// # Errors
    ///
    /// * [`ReconcileError::Edit`] if the session is not editing or its
    ///   draft is invalid (the session is left unchanged)
    /// * see [`save_geometry`](Self::save_geometry)
    pub async fn save_session(
        &self,
        session: &mut EditSession,
        fence_id: FenceId,
    ) -> Result<Perimeter, ReconcileError> {
        let SavedPerimeter {
            perimeter_id,
            coordinates,
        } = session.save()?;
        self.save_geometry(fence_id, perimeter_id, &coordinates)
            .await
    }

    /// Renames a perimeter, keeping its shape.
    ///
    /// # Errors
    ///
    /// * [`ReconcileError::Store`] if the perimeter is not held locally and
    ///   cannot be read
    /// * [`ReconcileError::ForeignPerimeter`] if it belongs to another fence
    /// * [`ReconcileError::PersistenceFailure`] if the store rejects the
    ///   write (local state is restored)
    pub async fn rename_perimeter(
        &self,
        fence_id: FenceId,
        perimeter_id: PerimeterId,
        name: &str,
    ) -> Result<Perimeter, ReconcileError> {
        let current = self.current(fence_id, perimeter_id).await?;
        let name = Some(name.trim().to_string()).filter(|n| !n.is_empty());
        let renamed = Perimeter { name, ..current };
        let prior = self
            .shared
            .stage(fence_id, perimeter_id, Some(renamed.clone()));

        let update = PerimeterUpdate {
            name: renamed.name,
            shape: renamed.shape,
        };
        match self.shared.store.update_perimeter(perimeter_id, update).await {
            Ok(saved) => {
                self.shared.settle(fence_id, perimeter_id, saved.clone());
                self.broadcast(&ChangeEvent::PerimeterUpdated(saved.id));
                Ok(saved)
            }
            Err(source) => Err(self.rollback(fence_id, prior, source).await),
        }
    }

    /// Deletes a perimeter.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::PersistenceFailure`] if the store rejects
    /// the delete (local state is restored).
    pub async fn delete_perimeter(
        &self,
        fence_id: FenceId,
        perimeter_id: PerimeterId,
    ) -> Result<(), ReconcileError> {
        let prior = self.shared.stage(fence_id, perimeter_id, None);

        match self.shared.store.delete_perimeter(perimeter_id).await {
            Ok(()) => {
                log::info!("Fence {fence_id}: deleted perimeter {perimeter_id}");
                self.broadcast(&ChangeEvent::PerimeterDeleted(perimeter_id));
                Ok(())
            }
            Err(source) => Err(self.rollback(fence_id, prior, source).await),
        }
    }

    /// Creates a fence with its first perimeter and a default rule, then
    /// broadcasts `fence_created`.
    ///
    /// If the perimeter or rule cannot be written the new fence is deleted
    /// again.
    ///
    /// # Errors
    ///
    /// * [`ReconcileError::Geometry`] if the polygon is invalid
    /// * [`ReconcileError::PersistenceFailure`] if any write fails
    pub async fn create_fence(&self, request: NewFence) -> Result<CreatedFence, ReconcileError> {
        let NewFence {
            fence,
            perimeter_name,
            polygon,
            template,
        } = request;
        let coordinates = ring::open_ring(&polygon.coordinates);
        ring::validate(&coordinates)?;

        let store = &self.shared.store;
        let geofence = store.create_geofence(fence).await.map_err(|source| {
            ReconcileError::PersistenceFailure {
                source,
                restored_from: RestoreSource::Unchanged,
            }
        })?;

        let children = async {
            let perimeter = store
                .create_perimeter(NewPerimeter {
                    fence_id: geofence.id,
                    name: perimeter_name,
                    shape: PerimeterShape::Polygon { coordinates },
                    created_at: geofence.created_at,
                })
                .await?;
            let rule = store
                .create_rule(template.to_rule(geofence.id, geofence.created_at))
                .await?;
            Ok::<_, StoreError>((perimeter, rule))
        };

        match children.await {
            Ok((perimeter, rule)) => {
                self.shared
                    .cache()
                    .insert(geofence.id, vec![perimeter.clone()]);
                log::info!("Created fence {} ({})", geofence.id, geofence.name);
                self.broadcast(&ChangeEvent::FenceCreated(geofence.id));
                Ok(CreatedFence {
                    geofence,
                    perimeter,
                    rule,
                })
            }
            Err(source) => {
                log::warn!(
                    "Creating fence {} failed ({source}), deleting it",
                    geofence.id
                );
                let restored_from = match store.delete_geofence(geofence.id).await {
                    Ok(()) => RestoreSource::Compensated,
                    Err(e) => {
                        log::error!("Failed to delete partial fence {}: {e}", geofence.id);
                        RestoreSource::Unrestored
                    }
                };
                Err(ReconcileError::PersistenceFailure {
                    source,
                    restored_from,
                })
            }
        }
    }

    /// Deletes a fence and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::PersistenceFailure`] if the store rejects
    /// the delete (local state is restored).
    pub async fn delete_fence(&self, fence_id: FenceId) -> Result<(), ReconcileError> {
        let prior = self
            .shared
            .cache()
            .remove(&fence_id)
            .map_or(Prior::NotLoaded, Prior::Fence);

        match self.shared.store.delete_geofence(fence_id).await {
            Ok(()) => {
                log::info!("Deleted fence {fence_id}");
                self.broadcast(&ChangeEvent::FenceDeleted(fence_id));
                Ok(())
            }
            Err(source) => Err(self.rollback(fence_id, prior, source).await),
        }
    }

    /// Re-fetches `fence_id` whenever another client reports a change to
    /// it, for as long as the returned handle is held.
    #[must_use]
    pub fn watch(&self, fence_id: FenceId) -> FenceWatch {
        FenceWatch::new(&self.broadcaster, Arc::clone(&self.shared), fence_id)
    }

    /// The perimeter as held locally, or as stored if the fence is not
    /// loaded.
    async fn current(
        &self,
        fence_id: FenceId,
        perimeter_id: PerimeterId,
    ) -> Result<Perimeter, ReconcileError> {
        if let Some(perimeter) = self.perimeter(fence_id, perimeter_id) {
            return Ok(perimeter);
        }

        let perimeter = self.shared.store.get_perimeter(perimeter_id).await?;
        if perimeter.fence_id != fence_id {
            return Err(ReconcileError::ForeignPerimeter {
                perimeter: perimeter_id,
                fence: fence_id,
                owner: perimeter.fence_id,
            });
        }
        Ok(perimeter)
    }

    fn broadcast(&self, event: &ChangeEvent) {
        if !self.broadcaster.send(event) {
            log::debug!("{} reached local listeners only", event.kind());
        }
    }

    async fn rollback(
        &self,
        fence_id: FenceId,
        prior: Prior,
        source: StoreError,
    ) -> ReconcileError {
        log::warn!("Fence {fence_id}: write failed ({source}), rolling back");
        let restored_from = self.shared.restore(fence_id, prior).await;
        ReconcileError::PersistenceFailure {
            source,
            restored_from,
        }
    }
}
