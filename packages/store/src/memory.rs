//! In-process [`FenceStore`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use fence_map_fence_models::{
    FenceId, Geofence, NewGeofence, NewPerimeter, NewPin, NewRule, Perimeter, PerimeterId,
    PerimeterUpdate, Pin, Rule,
};

use crate::{FenceStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    geofences: BTreeMap<FenceId, Geofence>,
    perimeters: BTreeMap<PerimeterId, Perimeter>,
    rules: BTreeMap<i64, Rule>,
    pins: BTreeMap<i64, Pin>,
}

impl Tables {
    /// Ids start at 1 and are never reused; 0 is reserved for drafts.
    const fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn require_fence(&self, id: FenceId) -> Result<(), StoreError> {
        if self.geofences.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                entity: "geofence",
                id: id.0,
            })
        }
    }
}

/// Store backed by in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FenceStore for MemoryStore {
    async fn list_geofences(&self) -> Result<Vec<Geofence>, StoreError> {
        Ok(self.tables().geofences.values().cloned().collect())
    }

    async fn get_geofence(&self, id: FenceId) -> Result<Geofence, StoreError> {
        self.tables()
            .geofences
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "geofence",
                id: id.0,
            })
    }

    async fn create_geofence(&self, fence: NewGeofence) -> Result<Geofence, StoreError> {
        let mut tables = self.tables();
        let fence = fence.with_id(FenceId(tables.next_id()));
        tables.geofences.insert(fence.id, fence.clone());
        log::debug!("Created geofence {} ({})", fence.id, fence.name);
        Ok(fence)
    }

    async fn update_geofence(&self, fence: &Geofence) -> Result<Geofence, StoreError> {
        let mut tables = self.tables();
        let slot = tables
            .geofences
            .get_mut(&fence.id)
            .ok_or(StoreError::NotFound {
                entity: "geofence",
                id: fence.id.0,
            })?;
        *slot = fence.clone();
        Ok(fence.clone())
    }

    async fn delete_geofence(&self, id: FenceId) -> Result<(), StoreError> {
        let mut tables = self.tables();
        tables.geofences.remove(&id);
        tables.perimeters.retain(|_, p| p.fence_id != id);
        tables.rules.retain(|_, r| r.fence_id != id);
        tables.pins.retain(|_, p| p.fence_id != id);
        log::debug!("Deleted geofence {id} and its children");
        Ok(())
    }

    async fn list_perimeters(&self, fence_id: FenceId) -> Result<Vec<Perimeter>, StoreError> {
        Ok(self
            .tables()
            .perimeters
            .values()
            .filter(|p| p.fence_id == fence_id)
            .cloned()
            .collect())
    }

    async fn get_perimeter(&self, id: PerimeterId) -> Result<Perimeter, StoreError> {
        self.tables()
            .perimeters
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "perimeter",
                id: id.0,
            })
    }

    async fn create_perimeter(&self, perimeter: NewPerimeter) -> Result<Perimeter, StoreError> {
        let mut tables = self.tables();
        tables.require_fence(perimeter.fence_id)?;
        let perimeter = perimeter.with_id(PerimeterId(tables.next_id()));
        tables.perimeters.insert(perimeter.id, perimeter.clone());
        Ok(perimeter)
    }

    async fn update_perimeter(
        &self,
        id: PerimeterId,
        update: PerimeterUpdate,
    ) -> Result<Perimeter, StoreError> {
        let mut tables = self.tables();
        let perimeter = tables
            .perimeters
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "perimeter",
                id: id.0,
            })?;
        perimeter.name = update.name;
        perimeter.shape = update.shape;
        Ok(perimeter.clone())
    }

    async fn delete_perimeter(&self, id: PerimeterId) -> Result<(), StoreError> {
        self.tables().perimeters.remove(&id);
        Ok(())
    }

    async fn list_rules(&self, fence_id: FenceId) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .tables()
            .rules
            .values()
            .filter(|r| r.fence_id == fence_id)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, rule: NewRule) -> Result<Rule, StoreError> {
        let mut tables = self.tables();
        tables.require_fence(rule.fence_id)?;
        let rule = rule.with_id(tables.next_id());
        tables.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn list_pins(&self, fence_id: FenceId) -> Result<Vec<Pin>, StoreError> {
        Ok(self
            .tables()
            .pins
            .values()
            .filter(|p| p.fence_id == fence_id)
            .cloned()
            .collect())
    }

    async fn create_pin(&self, pin: NewPin) -> Result<Pin, StoreError> {
        let mut tables = self.tables();
        tables.require_fence(pin.fence_id)?;
        let pin = pin.with_id(tables.next_id());
        tables.pins.insert(pin.id, pin.clone());
        Ok(pin)
    }

    async fn delete_pin(&self, id: i64) -> Result<(), StoreError> {
        self.tables().pins.remove(&id);
        Ok(())
    }
}
