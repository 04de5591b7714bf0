//! `GeoJSON` polygons for the map display layer.
//!
//! Map libraries want closed rings in `[lng, lat]` order, while stored
//! perimeters are open rings in `[lat, lng]` order. These helpers cross
//! that boundary in both directions.

use fence_map_fence_models::{DisplayCoord, StorageCoord};
use geojson::{Geometry, Value};

use crate::ring::{close_ring, open_ring, to_display_order, to_storage_order};
use crate::{GeometryError, RingDefect};

/// Builds a closed, display-order `Polygon` geometry from a stored ring.
#[must_use]
pub fn ring_to_geojson(ring: &[StorageCoord]) -> Geometry {
    display_ring_to_geojson(&to_display_order(ring))
}

/// Builds a closed `Polygon` geometry from a display-order ring.
#[must_use]
pub fn display_ring_to_geojson(ring: &[DisplayCoord]) -> Geometry {
    let positions = close_ring(ring)
        .into_iter()
        .map(|c| vec![c.longitude, c.latitude])
        .collect();

    Geometry::new(Value::Polygon(vec![positions]))
}

/// Extracts the outer ring of a `Polygon` geometry as an open,
/// storage-order ring. Holes are ignored.
///
/// # Errors
///
/// Returns [`GeometryError::UnsupportedGeometry`] for anything other than
/// a `Polygon`, and [`GeometryError::InvalidRing`] if a position has
/// fewer than two components.
pub fn geojson_to_ring(geometry: &Geometry) -> Result<Vec<StorageCoord>, GeometryError> {
    let Value::Polygon(rings) = &geometry.value else {
        return Err(GeometryError::UnsupportedGeometry {
            kind: type_name(&geometry.value).to_string(),
        });
    };

    let Some(outer) = rings.first() else {
        return Ok(Vec::new());
    };

    let display = outer
        .iter()
        .enumerate()
        .map(|(index, position)| match position.as_slice() {
            [lng, lat, ..] => Ok(DisplayCoord::new(*lng, *lat)),
            _ => Err(GeometryError::InvalidRing(RingDefect::ShortPosition {
                index,
            })),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(to_storage_order(&open_ring(&display)))
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}
