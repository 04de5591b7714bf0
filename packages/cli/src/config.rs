//! Settings from the environment and an optional TOML file.
//!
//! ```toml
//! api_url = "http://localhost:3000/api"
//! mapbox_token = "pk..."
//!
//! [broadcaster]
//! endpoint = "ws://localhost:5173"
//! reconnect_interval_ms = 5000
//! max_reconnect_attempts = 10
//! ```
//!
//! A `[geocoder]` table (`type = "mapbox"` or `type = "nominatim"`) may be
//! given instead of `mapbox_token`. Values in the file override the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fence_map_broadcast::BroadcasterConfig;
use fence_map_geocoder::GeocoderConfig;
use fence_map_store::rest::DEFAULT_API_URL;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    mapbox_token: Option<String>,
    geocoder: Option<GeocoderConfig>,
    #[serde(default)]
    broadcaster: BroadcasterSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BroadcasterSection {
    endpoint: Option<String>,
    reconnect_interval_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub broadcaster: BroadcasterConfig,
    pub geocoder: Option<GeocoderConfig>,
}

impl Settings {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("FENCE_MAP_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            broadcaster: BroadcasterConfig::from_env(),
            geocoder: GeocoderConfig::from_env(),
        }
    }

    /// Environment settings, overridden by `path` if given.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] if the file cannot be read
    /// * [`ConfigError::Parse`] if it is not a valid config
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = Self::from_env();
        let Some(path) = path else {
            return Ok(settings);
        };

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        settings.merge_toml(&text)
    }

    fn merge_toml(self, text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        Ok(self.apply(file))
    }

    fn apply(mut self, file: FileConfig) -> Self {
        if let Some(api_url) = file.api_url {
            self.api_url = api_url;
        }

        if let Some(geocoder) = file.geocoder {
            self.geocoder = Some(geocoder);
        } else if let Some(token) = file.mapbox_token {
            self.geocoder = Some(GeocoderConfig::mapbox(&token));
        }

        let section = file.broadcaster;
        if let Some(endpoint) = section.endpoint {
            self.broadcaster.endpoint = endpoint;
        }
        if let Some(ms) = section.reconnect_interval_ms {
            self.broadcaster.reconnect_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = section.max_reconnect_attempts {
            self.broadcaster.max_reconnect_attempts = attempts;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Settings {
        Settings {
            api_url: DEFAULT_API_URL.to_string(),
            broadcaster: BroadcasterConfig::default(),
            geocoder: None,
        }
    }

    #[test]
    fn empty_file_keeps_defaults() {
        assert_eq!(defaults().merge_toml("").unwrap(), defaults());
    }

    #[test]
    fn file_values_override() {
        let settings = defaults()
            .merge_toml(
                r#"
                api_url = "https://fences.example.com/api"
                mapbox_token = "pk.test"

                [broadcaster]
                endpoint = "ws://relay.example.com:5173"
                reconnect_interval_ms = 250
                "#,
            )
            .unwrap();

        assert_eq!(settings.api_url, "https://fences.example.com/api");
        assert_eq!(settings.broadcaster.endpoint, "ws://relay.example.com:5173");
        assert_eq!(
            settings.broadcaster.reconnect_interval,
            Duration::from_millis(250)
        );
        assert_eq!(settings.broadcaster.max_reconnect_attempts, 10);
        assert_eq!(settings.geocoder, Some(GeocoderConfig::mapbox("pk.test")));
    }

    #[test]
    fn geocoder_table_wins_over_token() {
        let settings = defaults()
            .merge_toml(
                r#"
                mapbox_token = "pk.test"

                [geocoder]
                type = "nominatim"
                base_url = "http://localhost:8080/reverse"
                "#,
            )
            .unwrap();

        assert_eq!(
            settings.geocoder,
            Some(GeocoderConfig::Nominatim {
                base_url: "http://localhost:8080/reverse".to_string(),
            })
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            defaults().merge_toml("api = \"x\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Settings::load(Some(Path::new("/nonexistent/fence_map.toml"))),
            Err(ConfigError::Io { .. })
        ));
    }
}
