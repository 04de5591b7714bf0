#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persistence for geofences and the records they own.
//!
//! [`FenceStore`] is the seam the rest of the fence map talks to.
//! [`MemoryStore`] keeps everything in process; [`RestStore`] talks to
//! the `/api` REST service.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use fence_map_fence_models::{
    FenceId, Geofence, NewGeofence, NewPerimeter, NewPin, NewRule, Perimeter, PerimeterId,
    PerimeterUpdate, Pin, Rule,
};
use thiserror::Error;

pub use memory::MemoryStore;
pub use rest::RestStore;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("API error {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text from the response body, or the status reason.
        message: String,
    },

    /// The referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record (`"geofence"`, `"perimeter"`, ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: i64,
    },

    /// A response body could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable storage of geofences, perimeters, rules and pins.
///
/// Writes return the authoritative record as stored. Deleting a geofence
/// removes its perimeters, rules and pins.
#[async_trait]
pub trait FenceStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn list_geofences(&self) -> Result<Vec<Geofence>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    async fn get_geofence(&self, id: FenceId) -> Result<Geofence, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn create_geofence(&self, fence: NewGeofence) -> Result<Geofence, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id, or another
    /// [`StoreError`] if the write fails.
    async fn update_geofence(&self, fence: &Geofence) -> Result<Geofence, StoreError>;

    /// Deletes the geofence and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    async fn delete_geofence(&self, id: FenceId) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn list_perimeters(&self, fence_id: FenceId) -> Result<Vec<Perimeter>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    async fn get_perimeter(&self, id: PerimeterId) -> Result<Perimeter, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn create_perimeter(&self, perimeter: NewPerimeter) -> Result<Perimeter, StoreError>;

    /// Replaces the name and shape of an existing perimeter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id, or another
    /// [`StoreError`] if the write fails.
    async fn update_perimeter(
        &self,
        id: PerimeterId,
        update: PerimeterUpdate,
    ) -> Result<Perimeter, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    async fn delete_perimeter(&self, id: PerimeterId) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn list_rules(&self, fence_id: FenceId) -> Result<Vec<Rule>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn create_rule(&self, rule: NewRule) -> Result<Rule, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn list_pins(&self, fence_id: FenceId) -> Result<Vec<Pin>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn create_pin(&self, pin: NewPin) -> Result<Pin, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    async fn delete_pin(&self, id: i64) -> Result<(), StoreError>;
}
