#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client-local editing session for a single perimeter.
//!
//! An [`EditSession`] holds the draft geometry while an operator draws a
//! new polygon or drags the vertices of an existing one. The draft lives
//! in display order (`[lng, lat]`), the order the map hands back; it is
//! converted to an open storage-order ring only when the session is
//! confirmed or saved.
//!
//! ```text
//! Idle --start_drawing--> Drawing --confirm_draw--> Idle
//! Idle --start_editing--> Editing --save--> Idle
//! Drawing | Editing --cancel--> Idle
//! ```
//!
//! Calling an operation from the wrong state returns
//! [`EditError::IllegalStateTransition`] and leaves the session untouched.

use fence_map_fence_models::{DisplayCoord, PerimeterId, StorageCoord, Vertex};
use fence_map_geometry::display::display_ring_to_geojson;
use fence_map_geometry::ring::{self, MIN_RING_VERTICES};
use fence_map_geometry::{GeometryError, Measurements, bounding_box_center};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditMode {
    #[default]
    Idle,
    Drawing,
    Editing(PerimeterId),
}

impl std::fmt::Display for EditMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Drawing => f.write_str("drawing"),
            Self::Editing(id) => write!(f, "editing perimeter {id}"),
        }
    }
}

/// Session operations, named in transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EditOperation {
    StartDrawing,
    StartEditing,
    AddVertex,
    UpdateVertex,
    RemoveVertex,
    ConfirmDraw,
    Save,
    Cancel,
}

/// Errors from session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// The operation is not allowed from the current mode.
    #[error("cannot {attempted} while {current}")]
    IllegalStateTransition {
        /// Mode the session was in.
        current: EditMode,
        /// Operation that was attempted.
        attempted: EditOperation,
    },

    /// A drawn polygon needs at least three vertices.
    #[error("polygon has {count} vertices, at least 3 required")]
    InsufficientVertices {
        /// Vertices in the draft after opening the ring.
        count: usize,
    },

    /// A vertex index does not exist in the draft.
    #[error("vertex index {index} out of range for draft of {len} vertices")]
    VertexOutOfRange {
        /// Requested index.
        index: usize,
        /// Current draft length.
        len: usize,
    },

    /// The draft does not describe a valid ring.
    #[error(transparent)]
    InvalidRing(#[from] GeometryError),
}

/// A newly drawn polygon, ready to become a fence perimeter.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnPolygon {
    /// Open ring in storage order.
    pub coordinates: Vec<StorageCoord>,
    /// Bounding-box centre, used for reverse geocoding.
    pub center: Vertex,
    pub measurements: Measurements,
}

/// The result of saving an edited perimeter.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPerimeter {
    pub perimeter_id: PerimeterId,
    /// Open, validated ring in storage order.
    pub coordinates: Vec<StorageCoord>,
}

/// Draft geometry for one perimeter being drawn or edited.
#[derive(Debug, Clone, Default)]
pub struct EditSession {
    mode: EditMode,
    draft: Vec<DisplayCoord>,
}

impl EditSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn mode(&self) -> EditMode {
        self.mode
    }

    /// Current draft vertices in display order.
    #[must_use]
    pub fn draft(&self) -> &[DisplayCoord] {
        &self.draft
    }

    /// Draft as a closed ring, the shape the map layer renders.
    #[must_use]
    pub fn display_ring(&self) -> Vec<DisplayCoord> {
        ring::close_ring(&self.draft)
    }

    /// Draft as a `GeoJSON` polygon for the map layer.
    #[must_use]
    pub fn to_geojson(&self) -> geojson::Geometry {
        display_ring_to_geojson(&self.draft)
    }

    /// Area and length of the draft as it stands, for on-screen feedback.
    #[must_use]
    pub fn live_measurements(&self) -> Measurements {
        Measurements::of_ring(&ring::open_ring(&self.draft))
    }

    /// Begins drawing a new polygon with an empty draft.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] unless the session is idle.
    pub fn start_drawing(&mut self) -> Result<(), EditError> {
        self.require_idle(EditOperation::StartDrawing)?;
        self.mode = EditMode::Drawing;
        self.draft.clear();
        log::debug!("Edit session: drawing new perimeter");
        Ok(())
    }

    /// Begins editing an existing perimeter, seeding the draft from its
    /// stored ring.
    ///
    /// Returns `Ok(false)` and stays idle when `existing` is empty: there
    /// is nothing to edit and the request is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] unless the session is idle.
    pub fn start_editing(
        &mut self,
        perimeter_id: PerimeterId,
        existing: &[StorageCoord],
    ) -> Result<bool, EditError> {
        self.require_idle(EditOperation::StartEditing)?;

        if existing.is_empty() {
            log::debug!("Edit session: perimeter {perimeter_id} has no vertices, ignoring");
            return Ok(false);
        }

        self.draft = ring::to_display_order(existing);
        self.mode = EditMode::Editing(perimeter_id);
        log::debug!(
            "Edit session: editing perimeter {perimeter_id} ({} vertices)",
            self.draft.len()
        );
        Ok(true)
    }

    /// Appends a vertex to the draft.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] unless drawing or editing.
    pub fn add_vertex(&mut self, vertex: DisplayCoord) -> Result<(), EditError> {
        self.require_active(EditOperation::AddVertex)?;
        self.draft.push(vertex);
        Ok(())
    }

    /// Moves the vertex at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] unless drawing or
    /// editing, or [`EditError::VertexOutOfRange`] for a bad index.
    pub fn update_vertex(&mut self, index: usize, vertex: DisplayCoord) -> Result<(), EditError> {
        self.require_active(EditOperation::UpdateVertex)?;
        let len = self.draft.len();
        let slot = self
            .draft
            .get_mut(index)
            .ok_or(EditError::VertexOutOfRange { index, len })?;
        *slot = vertex;
        Ok(())
    }

    /// Removes the vertex at `index`, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] unless drawing or
    /// editing, or [`EditError::VertexOutOfRange`] for a bad index.
    pub fn remove_vertex(&mut self, index: usize) -> Result<DisplayCoord, EditError> {
        self.require_active(EditOperation::RemoveVertex)?;
        let len = self.draft.len();
        if index >= len {
            return Err(EditError::VertexOutOfRange { index, len });
        }
        Ok(self.draft.remove(index))
    }

    /// Finishes drawing and returns the polygon with its centre and
    /// measurements.
    ///
    /// On error the session keeps drawing with the draft intact.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] unless drawing,
    /// [`EditError::InsufficientVertices`] for fewer than three vertices,
    /// or [`EditError::InvalidRing`] if the ring fails validation.
    pub fn confirm_draw(&mut self) -> Result<DrawnPolygon, EditError> {
        if self.mode != EditMode::Drawing {
            return Err(self.illegal(EditOperation::ConfirmDraw));
        }

        let opened = ring::open_ring(&self.draft);
        if opened.len() < MIN_RING_VERTICES {
            return Err(EditError::InsufficientVertices {
                count: opened.len(),
            });
        }
        ring::validate(&opened)?;

        let coordinates = ring::to_storage_order(&opened);
        let center = bounding_box_center(&coordinates).ok_or(EditError::InsufficientVertices {
            count: coordinates.len(),
        })?;
        let measurements = Measurements::of_ring(&coordinates);

        self.reset();
        log::debug!(
            "Edit session: drew polygon of {} vertices ({:.0} m²)",
            coordinates.len(),
            measurements.area_m2
        );

        Ok(DrawnPolygon {
            coordinates,
            center,
            measurements,
        })
    }

    /// Finishes editing and returns the normalized ring to persist.
    ///
    /// On error the session keeps editing with the draft intact.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] unless editing, or
    /// [`EditError::InvalidRing`] if the draft fails validation.
    pub fn save(&mut self) -> Result<SavedPerimeter, EditError> {
        let EditMode::Editing(perimeter_id) = self.mode else {
            return Err(self.illegal(EditOperation::Save));
        };

        let coordinates = ring::to_storage_order(&ring::open_ring(&self.draft));
        ring::validate(&coordinates)?;

        self.reset();
        log::debug!(
            "Edit session: saved perimeter {perimeter_id} ({} vertices)",
            coordinates.len()
        );

        Ok(SavedPerimeter {
            perimeter_id,
            coordinates,
        })
    }

    /// Discards the draft and returns to idle.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IllegalStateTransition`] when already idle.
    pub fn cancel(&mut self) -> Result<(), EditError> {
        self.require_active(EditOperation::Cancel)?;
        log::debug!("Edit session: cancelled while {}", self.mode);
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.mode = EditMode::Idle;
        self.draft.clear();
    }

    fn require_idle(&self, attempted: EditOperation) -> Result<(), EditError> {
        if self.mode == EditMode::Idle {
            Ok(())
        } else {
            Err(self.illegal(attempted))
        }
    }

    fn require_active(&self, attempted: EditOperation) -> Result<(), EditError> {
        if self.mode == EditMode::Idle {
            Err(self.illegal(attempted))
        } else {
            Ok(())
        }
    }

    const fn illegal(&self, attempted: EditOperation) -> EditError {
        EditError::IllegalStateTransition {
            current: self.mode,
            attempted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fence_map_geometry::RingDefect;

    fn stored_square() -> Vec<StorageCoord> {
        vec![
            StorageCoord::new(-23.550, -46.630),
            StorageCoord::new(-23.550, -46.640),
            StorageCoord::new(-23.560, -46.640),
            StorageCoord::new(-23.560, -46.630),
        ]
    }

    fn draw(session: &mut EditSession, ring: &[StorageCoord]) {
        session.start_drawing().unwrap();
        for coord in ring {
            session.add_vertex(coord.to_display()).unwrap();
        }
    }

    #[test]
    fn save_outside_editing_is_rejected_without_side_effects() {
        let mut session = EditSession::new();
        let err = session.save().unwrap_err();
        assert_eq!(
            err,
            EditError::IllegalStateTransition {
                current: EditMode::Idle,
                attempted: EditOperation::Save,
            }
        );
        assert_eq!(err.to_string(), "cannot save while idle");

        draw(&mut session, &stored_square());
        let before = session.draft().to_vec();
        assert!(matches!(
            session.save(),
            Err(EditError::IllegalStateTransition {
                current: EditMode::Drawing,
                ..
            })
        ));
        assert_eq!(session.mode(), EditMode::Drawing);
        assert_eq!(session.draft(), before.as_slice());
    }

    #[test]
    fn editing_seeds_display_order_and_saves_storage_order() {
        let mut session = EditSession::new();
        assert!(session.start_editing(PerimeterId(4), &stored_square()).unwrap());
        assert_eq!(session.mode(), EditMode::Editing(PerimeterId(4)));
        assert_eq!(session.draft()[0], DisplayCoord::new(-46.630, -23.550));

        session
            .update_vertex(0, DisplayCoord::new(-46.625, -23.548))
            .unwrap();
        let saved = session.save().unwrap();

        assert_eq!(saved.perimeter_id, PerimeterId(4));
        assert_eq!(saved.coordinates[0], StorageCoord::new(-23.548, -46.625));
        assert_eq!(&saved.coordinates[1..], &stored_square()[1..]);
        assert_eq!(session.mode(), EditMode::Idle);
        assert!(session.draft().is_empty());
    }

    #[test]
    fn save_strips_the_closing_vertex() {
        let mut session = EditSession::new();
        let mut closed = stored_square();
        closed.push(closed[0]);
        session.start_editing(PerimeterId(1), &closed).unwrap();

        let saved = session.save().unwrap();
        assert_eq!(saved.coordinates, stored_square());
    }

    #[test]
    fn editing_an_empty_perimeter_is_ignored() {
        let mut session = EditSession::new();
        assert!(!session.start_editing(PerimeterId(9), &[]).unwrap());
        assert_eq!(session.mode(), EditMode::Idle);
    }

    #[test]
    fn invalid_save_keeps_the_draft() {
        let mut session = EditSession::new();
        session.start_editing(PerimeterId(2), &stored_square()).unwrap();
        session.remove_vertex(3).unwrap();
        session.remove_vertex(2).unwrap();

        let err = session.save().unwrap_err();
        assert_eq!(
            err,
            EditError::InvalidRing(GeometryError::InvalidRing(
                RingDefect::TooFewDistinctVertices { distinct: 2 }
            ))
        );
        assert_eq!(session.mode(), EditMode::Editing(PerimeterId(2)));
        assert_eq!(session.draft().len(), 2);
    }

    #[test]
    fn confirm_draw_reports_center_and_measurements() {
        let mut session = EditSession::new();
        draw(&mut session, &stored_square());

        let live = session.live_measurements();
        let drawn = session.confirm_draw().unwrap();

        assert_eq!(drawn.coordinates, stored_square());
        assert!((drawn.center.latitude - -23.555).abs() < 1e-9);
        assert!((drawn.center.longitude - -46.635).abs() < 1e-9);
        assert!((drawn.measurements.area_m2 - 1_135_948.65).abs() < 0.01);
        assert!((drawn.measurements.perimeter_m - 4_262.49).abs() < 0.01);
        assert_eq!(live, drawn.measurements);
        assert_eq!(session.mode(), EditMode::Idle);
    }

    #[test]
    fn confirm_draw_needs_three_vertices() {
        let mut session = EditSession::new();
        draw(&mut session, &stored_square()[..2]);

        assert_eq!(
            session.confirm_draw(),
            Err(EditError::InsufficientVertices { count: 2 })
        );
        assert_eq!(session.mode(), EditMode::Drawing);
        assert_eq!(session.draft().len(), 2);
    }

    #[test]
    fn confirm_draw_only_from_drawing() {
        let mut session = EditSession::new();
        session.start_editing(PerimeterId(3), &stored_square()).unwrap();
        assert!(matches!(
            session.confirm_draw(),
            Err(EditError::IllegalStateTransition {
                attempted: EditOperation::ConfirmDraw,
                ..
            })
        ));
    }

    #[test]
    fn vertex_mutation_requires_an_active_session() {
        let mut session = EditSession::new();
        let vertex = DisplayCoord::new(0.0, 0.0);
        assert!(session.add_vertex(vertex).is_err());
        assert!(session.update_vertex(0, vertex).is_err());
        assert!(session.remove_vertex(0).is_err());
        assert!(session.cancel().is_err());
        assert!(session.draft().is_empty());
    }

    #[test]
    fn out_of_range_vertex_index() {
        let mut session = EditSession::new();
        draw(&mut session, &stored_square());
        assert_eq!(
            session.update_vertex(7, DisplayCoord::new(0.0, 0.0)),
            Err(EditError::VertexOutOfRange { index: 7, len: 4 })
        );
        assert_eq!(
            session.remove_vertex(4),
            Err(EditError::VertexOutOfRange { index: 4, len: 4 })
        );
    }

    #[test]
    fn cannot_start_twice() {
        let mut session = EditSession::new();
        session.start_drawing().unwrap();
        assert!(session.start_drawing().is_err());
        assert!(
            session
                .start_editing(PerimeterId(1), &stored_square())
                .is_err()
        );
    }

    #[test]
    fn cancel_discards_the_draft() {
        let mut session = EditSession::new();
        session.start_editing(PerimeterId(5), &stored_square()).unwrap();
        session.cancel().unwrap();
        assert_eq!(session.mode(), EditMode::Idle);
        assert!(session.draft().is_empty());

        draw(&mut session, &stored_square());
        session.cancel().unwrap();
        assert_eq!(session.mode(), EditMode::Idle);
    }

    #[test]
    fn display_ring_is_closed_for_rendering() {
        let mut session = EditSession::new();
        session.start_editing(PerimeterId(6), &stored_square()).unwrap();
        let ring = session.display_ring();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);

        let geometry = session.to_geojson();
        assert!(matches!(geometry.value, geojson::Value::Polygon(_)));
    }
}
