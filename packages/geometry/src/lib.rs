#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry for fence perimeters.
//!
//! - [`measure`]: spherical-earth area and perimeter of a vertex ring.
//! - [`ring`]: storage/display order conversion, open/closed ring
//!   normalization and validation.
//! - [`display`]: display-order `GeoJSON` polygons for the map layer.
//!
//! Everything here is pure and synchronous.

pub mod display;
pub mod measure;
pub mod ring;

use fence_map_fence_models::{PerimeterShape, StorageCoord};
use thiserror::Error;

pub use measure::{Measurements, bounding_box_center, polygon_area, polygon_perimeter};
pub use ring::{close_ring, open_ring, to_display_order, to_storage_order, validate};

/// Errors from ring validation and geometry conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// The ring cannot describe a polygon.
    #[error("invalid ring: {0}")]
    InvalidRing(RingDefect),

    /// A `GeoJSON` geometry of a type other than `Polygon` was supplied.
    #[error("unsupported GeoJSON geometry type: {kind}")]
    UnsupportedGeometry {
        /// The `GeoJSON` type name that was received.
        kind: String,
    },
}

/// Why a ring was rejected by [`ring::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingDefect {
    /// Fewer than three distinct vertices remain once the ring is opened.
    #[error("{distinct} distinct vertices, at least 3 required")]
    TooFewDistinctVertices {
        /// Number of distinct vertices found.
        distinct: usize,
    },

    /// A latitude or longitude is NaN or infinite.
    #[error("vertex {index} has a non-finite component")]
    NonFiniteCoordinate {
        /// Position of the offending vertex in the ring.
        index: usize,
    },

    /// A `GeoJSON` position had fewer than two components.
    #[error("position {index} has fewer than two components")]
    ShortPosition {
        /// Position of the offending entry in the ring.
        index: usize,
    },
}

/// Measures any perimeter shape.
///
/// Polygons use [`polygon_area`] and [`polygon_perimeter`]; circles are
/// treated as planar discs of the stored radius.
#[must_use]
pub fn measure_shape(shape: &PerimeterShape) -> Measurements {
    match shape {
        PerimeterShape::Polygon { coordinates } => Measurements::of_ring(coordinates),
        PerimeterShape::Circle { radius, .. } => Measurements {
            area_m2: std::f64::consts::PI * radius * radius,
            perimeter_m: 2.0 * std::f64::consts::PI * radius,
        },
    }
}

/// Centre point used to annotate a shape (bounding-box centre for
/// polygons, the centre for circles).
#[must_use]
pub fn shape_center(shape: &PerimeterShape) -> Option<StorageCoord> {
    match shape {
        PerimeterShape::Polygon { coordinates } => bounding_box_center(coordinates)
            .map(|center| StorageCoord::new(center.latitude, center.longitude)),
        PerimeterShape::Circle { center, .. } => Some(*center),
    }
}
