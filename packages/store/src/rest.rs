//! [`FenceStore`] over the fence map REST API.
//!
//! Collections live under `{base}/geofences`, `{base}/perimeters`,
//! `{base}/rules` and `{base}/geofence_pins`; children are filtered with
//! a `fenceId` query parameter. Deletes answer `204 No Content`.

use async_trait::async_trait;
use fence_map_fence_models::{
    FenceId, Geofence, NewGeofence, NewPerimeter, NewPin, NewRule, Perimeter, PerimeterId,
    PerimeterUpdate, Pin, Rule,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{FenceStore, StoreError};

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

/// Store backed by the REST service.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
}

impl RestStore {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Uses `FENCE_MAP_API_URL`, or [`DEFAULT_API_URL`] when unset.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("FENCE_MAP_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::new(&base_url)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Option<T>, StoreError> {
        let url = self.url(path);
        log::debug!("{method} {url}");

        let mut request = self.client.request(method, &url).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        decode_body(status, &bytes)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, StoreError> {
        self.request::<(), T>(Method::GET, path, query, None)
            .await?
            .ok_or_else(|| empty_body(path))
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        entity: &'static str,
        path: &str,
        id: i64,
    ) -> Result<T, StoreError> {
        match self.fetch(path, &[]).await {
            Err(StoreError::Status { status: 404, .. }) => Err(StoreError::NotFound { entity, id }),
            other => other,
        }
    }

    async fn write<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, StoreError> {
        self.request(method, path, &[], Some(body)).await
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.request::<(), serde_json::Value>(Method::DELETE, path, &[], None)
            .await?;
        Ok(())
    }
}

fn empty_body(path: &str) -> StoreError {
    StoreError::Status {
        status: StatusCode::NO_CONTENT.as_u16(),
        message: format!("empty response body from {path}"),
    }
}

fn fence_query(fence_id: FenceId) -> [(&'static str, String); 1] {
    [("fenceId", fence_id.to_string())]
}

/// Interprets a response.
///
/// Non-success statuses become [`StoreError::Status`], using the body's
/// `error` field when present. `204` and empty bodies yield `None`.
fn decode_body<T: DeserializeOwned>(
    status: StatusCode,
    bytes: &[u8],
) -> Result<Option<T>, StoreError> {
    if !status.is_success() {
        let message = serde_json::from_slice::<serde_json::Value>(bytes)
            .ok()
            .and_then(|v| v["error"].as_str().map(String::from))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        return Err(StoreError::Status {
            status: status.as_u16(),
            message,
        });
    }

    if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    Ok(Some(serde_json::from_slice(bytes)?))
}

#[async_trait]
impl FenceStore for RestStore {
    async fn list_geofences(&self) -> Result<Vec<Geofence>, StoreError> {
        self.fetch("geofences", &[]).await
    }

    async fn get_geofence(&self, id: FenceId) -> Result<Geofence, StoreError> {
        self.fetch_one("geofence", &format!("geofences/{id}"), id.0)
            .await
    }

    async fn create_geofence(&self, fence: NewGeofence) -> Result<Geofence, StoreError> {
        self.write(Method::POST, "geofences", &fence)
            .await?
            .ok_or_else(|| empty_body("geofences"))
    }

    async fn update_geofence(&self, fence: &Geofence) -> Result<Geofence, StoreError> {
        let path = format!("geofences/{}", fence.id);
        match self.write(Method::PUT, &path, fence).await? {
            Some(updated) => Ok(updated),
            None => self.get_geofence(fence.id).await,
        }
    }

    async fn delete_geofence(&self, id: FenceId) -> Result<(), StoreError> {
        self.remove(&format!("geofences/{id}")).await
    }

    async fn list_perimeters(&self, fence_id: FenceId) -> Result<Vec<Perimeter>, StoreError> {
        self.fetch("perimeters", &fence_query(fence_id)).await
    }

    async fn get_perimeter(&self, id: PerimeterId) -> Result<Perimeter, StoreError> {
        self.fetch_one("perimeter", &format!("perimeters/{id}"), id.0)
            .await
    }

    async fn create_perimeter(&self, perimeter: NewPerimeter) -> Result<Perimeter, StoreError> {
        self.write(Method::POST, "perimeters", &perimeter)
            .await?
            .ok_or_else(|| empty_body("perimeters"))
    }

    async fn update_perimeter(
        &self,
        id: PerimeterId,
        update: PerimeterUpdate,
    ) -> Result<Perimeter, StoreError> {
        let path = format!("perimeters/{id}");
        match self.write(Method::PUT, &path, &update).await? {
            Some(updated) => Ok(updated),
            None => self.get_perimeter(id).await,
        }
    }

    async fn delete_perimeter(&self, id: PerimeterId) -> Result<(), StoreError> {
        self.remove(&format!("perimeters/{id}")).await
    }

    async fn list_rules(&self, fence_id: FenceId) -> Result<Vec<Rule>, StoreError> {
        self.fetch("rules", &fence_query(fence_id)).await
    }

    async fn create_rule(&self, rule: NewRule) -> Result<Rule, StoreError> {
        self.write(Method::POST, "rules", &rule)
            .await?
            .ok_or_else(|| empty_body("rules"))
    }

    async fn list_pins(&self, fence_id: FenceId) -> Result<Vec<Pin>, StoreError> {
        self.fetch("geofence_pins", &fence_query(fence_id)).await
    }

    async fn create_pin(&self, pin: NewPin) -> Result<Pin, StoreError> {
        self.write(Method::POST, "geofence_pins", &pin)
            .await?
            .ok_or_else(|| empty_body("geofence_pins"))
    }

    async fn delete_pin(&self, id: i64) -> Result<(), StoreError> {
        self.remove(&format!("geofence_pins/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_onto_the_base_url() {
        let store = RestStore::new("http://localhost:3000/api/");
        assert_eq!(store.base_url(), "http://localhost:3000/api");
        assert_eq!(
            store.url("/perimeters/4"),
            "http://localhost:3000/api/perimeters/4"
        );
        assert_eq!(store.url("rules"), "http://localhost:3000/api/rules");
    }

    #[test]
    fn decodes_perimeter_lists() {
        let body = serde_json::json!([{
            "id": 4,
            "fenceId": 2,
            "type": "polygon",
            "coordinates": [[-23.55, -46.63], [-23.55, -46.64], [-23.56, -46.64]],
            "createdAt": "2025-01-15T12:00:00Z"
        }])
        .to_string();

        let perimeters: Vec<Perimeter> = decode_body(StatusCode::OK, body.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(perimeters.len(), 1);
        assert_eq!(perimeters[0].id, PerimeterId(4));
        assert_eq!(perimeters[0].fence_id, FenceId(2));
    }

    #[test]
    fn no_content_is_an_empty_body() {
        let decoded: Option<serde_json::Value> =
            decode_body(StatusCode::NO_CONTENT, b"").unwrap();
        assert!(decoded.is_none());

        let decoded: Option<serde_json::Value> = decode_body(StatusCode::OK, b"  ").unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn error_statuses_carry_the_api_message() {
        let body = serde_json::json!({ "error": "Failed to update item" }).to_string();
        let err = decode_body::<Perimeter>(StatusCode::INTERNAL_SERVER_ERROR, body.as_bytes())
            .unwrap_err();
        assert!(matches!(
            &err,
            StoreError::Status { status: 500, message } if message == "Failed to update item"
        ));

        let err = decode_body::<Perimeter>(StatusCode::NOT_FOUND, b"").unwrap_err();
        assert_eq!(err.to_string(), "API error 404: Not Found");
    }

    #[test]
    fn malformed_bodies_are_json_errors() {
        let err = decode_body::<Vec<Perimeter>>(StatusCode::OK, b"{\"id\":").unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[test]
    fn children_are_filtered_by_fence() {
        assert_eq!(fence_query(FenceId(9)), [("fenceId", "9".to_string())]);
    }
}
