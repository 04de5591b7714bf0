//! Ring normalization at the storage/display and open/closed boundaries.
//!
//! None of these functions perform arithmetic on coordinates, so every
//! conversion here is exact: `open_ring(&close_ring(v)) == v` and
//! `to_storage_order(&to_display_order(v)) == v` hold bit for bit.

use fence_map_fence_models::{Coordinate, DisplayCoord, StorageCoord};

use crate::{GeometryError, RingDefect};

/// Minimum number of distinct vertices a polygon ring needs.
pub const MIN_RING_VERTICES: usize = 3;

/// Converts `[lat, lng]` pairs to `[lng, lat]` pairs.
#[must_use]
pub fn to_display_order(ring: &[StorageCoord]) -> Vec<DisplayCoord> {
    ring.iter().map(|c| c.to_display()).collect()
}

/// Converts `[lng, lat]` pairs back to `[lat, lng]` pairs.
#[must_use]
pub fn to_storage_order(ring: &[DisplayCoord]) -> Vec<StorageCoord> {
    ring.iter().map(|c| c.to_storage()).collect()
}

/// Returns `true` if the ring repeats its first vertex at the end.
///
/// A single vertex counts as closed.
#[must_use]
pub fn is_closed<C: Coordinate>(ring: &[C]) -> bool {
    matches!((ring.first(), ring.last()), (Some(first), Some(last)) if first == last)
}

/// Appends a copy of the first vertex unless the ring is already closed.
#[must_use]
pub fn close_ring<C: Coordinate>(ring: &[C]) -> Vec<C> {
    let mut closed = ring.to_vec();
    if let Some(&first) = ring.first()
        && !is_closed(ring)
    {
        closed.push(first);
    }
    closed
}

/// Drops the repeated closing vertex, if any.
///
/// Rings of a single vertex are returned unchanged.
#[must_use]
pub fn open_ring<C: Coordinate>(ring: &[C]) -> Vec<C> {
    if ring.len() > 1 && is_closed(ring) {
        ring[..ring.len() - 1].to_vec()
    } else {
        ring.to_vec()
    }
}

/// Counts vertices that differ by exact component equality.
#[must_use]
pub fn distinct_vertex_count<C: Coordinate>(ring: &[C]) -> usize {
    let mut seen: Vec<C> = Vec::with_capacity(ring.len());
    for &c in ring {
        if !seen.contains(&c) {
            seen.push(c);
        }
    }
    seen.len()
}

/// Checks that a ring can describe a polygon.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidRing`] if any component is non-finite,
/// or if fewer than [`MIN_RING_VERTICES`] distinct vertices remain after
/// opening the ring.
pub fn validate<C: Coordinate>(ring: &[C]) -> Result<(), GeometryError> {
    if let Some(index) = ring.iter().position(|c| !c.vertex().is_finite()) {
        return Err(GeometryError::InvalidRing(
            RingDefect::NonFiniteCoordinate { index },
        ));
    }

    let distinct = distinct_vertex_count(&open_ring(ring));
    if distinct < MIN_RING_VERTICES {
        log::debug!("Rejecting ring with {distinct} distinct vertices");
        return Err(GeometryError::InvalidRing(
            RingDefect::TooFewDistinctVertices { distinct },
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<StorageCoord> {
        vec![
            StorageCoord::new(-23.550, -46.630),
            StorageCoord::new(-23.550, -46.640),
            StorageCoord::new(-23.560, -46.640),
        ]
    }

    #[test]
    fn display_order_swaps_components() {
        let display = to_display_order(&triangle());
        assert_eq!(display[1], DisplayCoord::new(-46.640, -23.550));
        assert_eq!(to_storage_order(&display), triangle());
    }

    #[test]
    fn close_then_open_is_identity() {
        let ring = triangle();
        let closed = close_ring(&ring);
        assert_eq!(closed.len(), 4);
        assert_eq!(closed[3], ring[0]);
        assert_eq!(open_ring(&closed), ring);
    }

    #[test]
    fn close_and_open_are_idempotent() {
        let ring = triangle();
        let closed = close_ring(&ring);
        assert_eq!(close_ring(&closed), closed);
        assert_eq!(open_ring(&ring), ring);
        assert_eq!(open_ring(&open_ring(&closed)), ring);
    }

    #[test]
    fn single_vertex_round_trips() {
        let ring = vec![StorageCoord::new(1.0, 2.0)];
        assert_eq!(close_ring(&ring), ring);
        assert_eq!(open_ring(&close_ring(&ring)), ring);
    }

    #[test]
    fn empty_ring_stays_empty() {
        let empty: Vec<StorageCoord> = Vec::new();
        assert!(close_ring(&empty).is_empty());
        assert!(open_ring(&empty).is_empty());
    }

    #[test]
    fn validate_accepts_open_and_closed_triangles() {
        assert!(validate(&triangle()).is_ok());
        assert!(validate(&close_ring(&triangle())).is_ok());
    }

    #[test]
    fn validate_rejects_too_few_distinct_vertices() {
        let mut ring = triangle();
        ring[2] = ring[1];
        assert_eq!(
            validate(&ring),
            Err(GeometryError::InvalidRing(
                RingDefect::TooFewDistinctVertices { distinct: 2 }
            ))
        );

        // Closing vertex is not counted as a third vertex.
        let two_and_closing = vec![ring[0], ring[1], ring[0]];
        assert!(validate(&two_and_closing).is_err());
    }

    #[test]
    fn validate_rejects_non_finite_components() {
        let mut ring = triangle();
        ring.push(StorageCoord::new(f64::NAN, -46.630));
        assert_eq!(
            validate(&ring),
            Err(GeometryError::InvalidRing(
                RingDefect::NonFiniteCoordinate { index: 3 }
            ))
        );

        let infinite = vec![
            DisplayCoord::new(f64::INFINITY, 0.0),
            DisplayCoord::new(1.0, 0.0),
            DisplayCoord::new(1.0, 1.0),
        ];
        assert!(validate(&infinite).is_err());
    }
}
