//! Geographic coordinate types.
//!
//! The persistence layer stores pairs as `[latitude, longitude]` while map
//! libraries expect `[longitude, latitude]`. Each convention gets its own
//! type so that the order is carried by the type system instead of being
//! guessed from the shape of a two-element array.

use serde::{Deserialize, Serialize};

/// A geographic point in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vertex {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Vertex {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite numbers.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// A coordinate pair in storage order, serialized as `[latitude, longitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct StorageCoord {
    pub latitude: f64,
    pub longitude: f64,
}

impl StorageCoord {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Swaps into display order. Lossless.
    #[must_use]
    pub const fn to_display(self) -> DisplayCoord {
        DisplayCoord {
            longitude: self.longitude,
            latitude: self.latitude,
        }
    }
}

impl From<[f64; 2]> for StorageCoord {
    fn from([latitude, longitude]: [f64; 2]) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl From<StorageCoord> for [f64; 2] {
    fn from(coord: StorageCoord) -> Self {
        [coord.latitude, coord.longitude]
    }
}

/// A coordinate pair in display order, serialized as `[longitude, latitude]`
/// (the `GeoJSON` / map-library convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct DisplayCoord {
    pub longitude: f64,
    pub latitude: f64,
}

impl DisplayCoord {
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Swaps into storage order. Exact inverse of [`StorageCoord::to_display`].
    #[must_use]
    pub const fn to_storage(self) -> StorageCoord {
        StorageCoord {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

impl From<[f64; 2]> for DisplayCoord {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

impl From<DisplayCoord> for [f64; 2] {
    fn from(coord: DisplayCoord) -> Self {
        [coord.longitude, coord.latitude]
    }
}

/// Any of the coordinate representations that ring utilities can work on.
///
/// Equality is exact component equality; no tolerance is applied.
pub trait Coordinate: Copy + PartialEq {
    /// Returns the semantic point regardless of serialized order.
    fn vertex(self) -> Vertex;
}

impl Coordinate for Vertex {
    fn vertex(self) -> Vertex {
        self
    }
}

impl Coordinate for StorageCoord {
    fn vertex(self) -> Vertex {
        Vertex::new(self.latitude, self.longitude)
    }
}

impl Coordinate for DisplayCoord {
    fn vertex(self) -> Vertex {
        Vertex::new(self.latitude, self.longitude)
    }
}
