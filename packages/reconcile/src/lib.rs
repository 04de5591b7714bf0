#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Keeps a client's local view of fence perimeters consistent with the
//! store and with other clients.
//!
//! Writes are optimistic: the local copy changes first, then the store is
//! called. On success the authoritative record replaces the local one and
//! a change event is broadcast. On failure the local copy is restored
//! (from a fresh read of the store, or from the pre-edit snapshot if the
//! store cannot be read either) and no success event is sent.
//!
//! Only the entry being written is rolled back, so a failed write does not
//! undo a sibling perimeter saved in the meantime. Concurrent saves of the
//! same perimeter from different clients are
//! last-writer-wins.

pub mod controller;
pub mod watch;

use fence_map_editor::EditError;
use fence_map_fence_models::{FenceId, PerimeterId};
use fence_map_geometry::GeometryError;
use fence_map_store::StoreError;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

pub use controller::{CreatedFence, NewFence, ReconciliationController};
pub use watch::FenceWatch;

/// How local state was put back after a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RestoreSource {
    /// Re-read from the store.
    Refetched,
    /// The pre-edit local copy was reinstated because the store could not
    /// be read.
    Snapshot,
    /// A partially created fence was deleted again.
    Compensated,
    /// Nothing had been written, so nothing needed restoring.
    Unchanged,
    /// A partially created fence could not be deleted and remains in the
    /// store.
    Unrestored,
}

/// Errors from reconciled operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The edit session rejected the operation.
    #[error(transparent)]
    Edit(#[from] EditError),

    /// The submitted ring is not a valid polygon.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The store rejected a write and local state was rolled back.
    #[error("failed to persist change (restored: {restored_from}): {source}")]
    PersistenceFailure {
        /// Underlying store error.
        #[source]
        source: StoreError,
        /// How local state was restored.
        restored_from: RestoreSource,
    },

    /// The perimeter exists but belongs to another fence.
    #[error("perimeter {perimeter} belongs to fence {owner}, not fence {fence}")]
    ForeignPerimeter {
        perimeter: PerimeterId,
        fence: FenceId,
        owner: FenceId,
    },

    /// A read from the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
