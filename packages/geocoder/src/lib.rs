#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reverse geocoding for newly drawn perimeters.
//!
//! When an operator finishes drawing, the bounding-box centre of the
//! polygon is looked up to suggest a human-readable address. Two
//! providers are supported:
//!
//! 1. **Mapbox**: `geocoding/v5/mapbox.places`, requires an access token.
//! 2. **Nominatim / OpenStreetMap**: `/reverse`, no key, 1 req/sec on the
//!    public instance.
//!
//! Lookups never block the drawing workflow: [`annotate_address`] turns
//! every failure into [`ADDRESS_NOT_FOUND`].

pub mod mapbox;
pub mod nominatim;

use async_trait::async_trait;
use fence_map_fence_models::Vertex;
use serde::Deserialize;
use thiserror::Error;

pub use mapbox::MapboxGeocoder;
pub use nominatim::NominatimGeocoder;

/// Placeholder used when no address can be resolved.
pub const ADDRESS_NOT_FOUND: &str = "Address not found";

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },
}

/// Resolves a point to a place name.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Returns the best place name for `point`, or `None` if the provider
    /// has no match.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the request or response parsing fails.
    async fn reverse(&self, point: Vertex) -> Result<Option<String>, GeocodeError>;
}

/// Looks up an address for `center`, falling back to
/// [`ADDRESS_NOT_FOUND`] on any failure or when no geocoder is configured.
pub async fn annotate_address(geocoder: Option<&dyn ReverseGeocoder>, center: Vertex) -> String {
    let Some(geocoder) = geocoder else {
        return ADDRESS_NOT_FOUND.to_string();
    };

    match geocoder.reverse(center).await {
        Ok(Some(address)) => address,
        Ok(None) => {
            log::debug!(
                "No address for ({}, {})",
                center.latitude,
                center.longitude
            );
            ADDRESS_NOT_FOUND.to_string()
        }
        Err(e) => {
            log::warn!("Reverse geocoding failed: {e}");
            ADDRESS_NOT_FOUND.to_string()
        }
    }
}

/// Provider selection, tagged by `type` in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeocoderConfig {
    /// Mapbox geocoding API.
    Mapbox {
        /// Mapbox access token.
        access_token: String,
        /// API base URL.
        #[serde(default = "mapbox::default_base_url")]
        base_url: String,
    },
    /// Nominatim / `OpenStreetMap`.
    Nominatim {
        /// Reverse endpoint (e.g., `"https://nominatim.openstreetmap.org/reverse"`).
        #[serde(default = "nominatim::default_base_url")]
        base_url: String,
    },
}

impl GeocoderConfig {
    /// Mapbox with the public API base URL.
    #[must_use]
    pub fn mapbox(access_token: &str) -> Self {
        Self::Mapbox {
            access_token: access_token.to_string(),
            base_url: mapbox::default_base_url(),
        }
    }

    /// Picks a provider from the environment: Mapbox when `MAPBOX_TOKEN`
    /// is set, otherwise Nominatim when `NOMINATIM_URL` is set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        if let Some(access_token) = std::env::var("MAPBOX_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
        {
            return Some(Self::mapbox(&access_token));
        }

        std::env::var("NOMINATIM_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .map(|base_url| Self::Nominatim { base_url })
    }

    /// Builds the configured geocoder.
    #[must_use]
    pub fn build(&self) -> Box<dyn ReverseGeocoder> {
        let client = reqwest::Client::new();
        match self {
            Self::Mapbox {
                access_token,
                base_url,
            } => Box::new(MapboxGeocoder::new(client, base_url, access_token)),
            Self::Nominatim { base_url } => Box::new(NominatimGeocoder::new(client, base_url)),
        }
    }
}
