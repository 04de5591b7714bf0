//! Spherical-earth measurements over a vertex ring.
//!
//! The ring is always treated as implicitly closed: the last vertex
//! connects back to the first whether or not the input repeats it.
//! Neither calculation corrects for antimeridian crossings or poles.

use fence_map_fence_models::{Coordinate, Vertex};
use geo::{BoundingRect, MultiPoint, Point};

/// Earth radius used by [`polygon_area`] (WGS84 equatorial radius).
///
/// Deliberately differs from [`PERIMETER_EARTH_RADIUS_M`]; stored and
/// displayed measurements were produced with these two values.
pub const AREA_EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Earth radius used by [`polygon_perimeter`] (mean radius).
pub const PERIMETER_EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Area and boundary length of a perimeter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    /// Area in square meters.
    pub area_m2: f64,
    /// Boundary length in meters.
    pub perimeter_m: f64,
}

impl Measurements {
    /// Measures a polygon ring in any coordinate order.
    #[must_use]
    pub fn of_ring<C: Coordinate>(ring: &[C]) -> Self {
        Self {
            area_m2: polygon_area(ring),
            perimeter_m: polygon_perimeter(ring),
        }
    }
}

/// Approximate area of a spherical polygon in square meters.
///
/// Sums `(lng2 - lng1) * (2 + sin(lat1) + sin(lat2))` over consecutive
/// vertex pairs (radians), scales by `R² / 2` and takes the absolute
/// value, so the result does not depend on winding direction or on the
/// starting vertex. Returns `0.0` for fewer than three vertices.
#[must_use]
pub fn polygon_area<C: Coordinate>(ring: &[C]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let sum: f64 = pairs(ring)
        .map(|(a, b)| {
            let lat1 = a.latitude.to_radians();
            let lat2 = b.latitude.to_radians();
            let lng1 = a.longitude.to_radians();
            let lng2 = b.longitude.to_radians();
            (lng2 - lng1) * (2.0 + lat1.sin() + lat2.sin())
        })
        .sum();

    (sum * AREA_EARTH_RADIUS_M * AREA_EARTH_RADIUS_M / 2.0).abs()
}

/// Length of the closed ring in meters, summing great-circle distances.
///
/// Returns `0.0` for fewer than two vertices.
#[must_use]
pub fn polygon_perimeter<C: Coordinate>(ring: &[C]) -> f64 {
    if ring.len() < 2 {
        return 0.0;
    }

    pairs(ring).map(|(a, b)| haversine_distance(a, b)).sum()
}

/// Great-circle distance between two points in meters.
#[must_use]
pub fn haversine_distance(a: Vertex, b: Vertex) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    PERIMETER_EARTH_RADIUS_M * c
}

/// Midpoint of the min/max latitude and longitude.
///
/// This is the bounding-box centre, not a true centroid; it is what the
/// reverse geocoder is queried with. Returns `None` for an empty ring.
#[must_use]
pub fn bounding_box_center<C: Coordinate>(ring: &[C]) -> Option<Vertex> {
    let points: MultiPoint<f64> = ring
        .iter()
        .map(|c| {
            let v = c.vertex();
            Point::new(v.longitude, v.latitude)
        })
        .collect();

    let rect = points.bounding_rect()?;
    let (min, max) = (rect.min(), rect.max());

    Some(Vertex::new((min.y + max.y) / 2.0, (min.x + max.x) / 2.0))
}

/// Formats a distance like `"512 m"` or `"1.25 km"`.
#[must_use]
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{:.2} km", meters / 1000.0)
    } else {
        format!("{} m", meters.round())
    }
}

/// Formats an area like `"830 m²"` or `"1.14 km²"`.
#[must_use]
pub fn format_area(square_meters: f64) -> String {
    if square_meters >= 1_000_000.0 {
        format!("{:.2} km²", square_meters / 1_000_000.0)
    } else {
        format!("{} m²", square_meters.round())
    }
}

/// Consecutive vertex pairs, wrapping from the last vertex to the first.
fn pairs<C: Coordinate>(ring: &[C]) -> impl Iterator<Item = (Vertex, Vertex)> + '_ {
    ring.iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| (a.vertex(), b.vertex()))
}
