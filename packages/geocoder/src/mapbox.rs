//! Mapbox reverse geocoder.
//!
//! See <https://docs.mapbox.com/api/search/geocoding-v5/>

use async_trait::async_trait;
use fence_map_fence_models::Vertex;

use crate::{GeocodeError, ReverseGeocoder};

pub(crate) fn default_base_url() -> String {
    "https://api.mapbox.com".to_string()
}

/// Reverse geocoder backed by `mapbox.places`.
#[derive(Debug, Clone)]
pub struct MapboxGeocoder {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl MapboxGeocoder {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, access_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    /// Request URL for `point`. Mapbox takes `{lng},{lat}`.
    fn url(&self, point: Vertex) -> String {
        format!(
            "{}/geocoding/v5/mapbox.places/{},{}.json",
            self.base_url, point.longitude, point.latitude
        )
    }
}

#[async_trait]
impl ReverseGeocoder for MapboxGeocoder {
    async fn reverse(&self, point: Vertex) -> Result<Option<String>, GeocodeError> {
        let resp = self
            .client
            .get(self.url(point))
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = resp.json().await?;
        parse_response(&body)
    }
}

/// Parses a Mapbox feature collection, returning the first place name.
fn parse_response(body: &serde_json::Value) -> Result<Option<String>, GeocodeError> {
    let features = body["features"]
        .as_array()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Mapbox response has no features array".to_string(),
        })?;

    Ok(features
        .first()
        .and_then(|f| f["place_name"].as_str())
        .map(String::from))
}
