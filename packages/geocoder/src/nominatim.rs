//! Nominatim / OpenStreetMap reverse geocoder.
//!
//! The public instance allows **1 request per second**; the caller is
//! responsible for pacing lookups.
//!
//! See <https://nominatim.org/release-docs/develop/api/Reverse/>

use async_trait::async_trait;
use fence_map_fence_models::Vertex;

use crate::{GeocodeError, ReverseGeocoder};

pub(crate) fn default_base_url() -> String {
    "https://nominatim.openstreetmap.org/reverse".to_string()
}

/// Reverse geocoder backed by a Nominatim `/reverse` endpoint.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, point: Vertex) -> Result<Option<String>, GeocodeError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("lat", point.latitude.to_string()),
                ("lon", point.longitude.to_string()),
                ("format", "jsonv2".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = resp.json().await?;
        parse_response(&body)
    }
}

/// Parses a Nominatim reverse response.
///
/// A point with no match comes back as `{"error": "Unable to geocode"}`.
fn parse_response(body: &serde_json::Value) -> Result<Option<String>, GeocodeError> {
    let object = body.as_object().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an object".to_string(),
    })?;

    if object.contains_key("error") {
        return Ok(None);
    }

    Ok(object
        .get("display_name")
        .and_then(serde_json::Value::as_str)
        .map(String::from))
}
