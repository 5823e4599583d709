//! Settings file at ~/.leafcast/config.json.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! A malformed file is an error rather than a silent reset.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::location::{Coordinates, PositionOptions, ProviderOptions, DEFAULT_FALLBACK, DEFAULT_IP_ENDPOINT};
use crate::probe::DEFAULT_BACKENDS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// The fallback city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_FALLBACK.latitude,
            longitude: DEFAULT_FALLBACK.longitude,
            label: "New Delhi".into(),
        }
    }
}

impl FallbackSettings {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fallback: FallbackSettings,
    pub one_shot: PositionOptions,
    pub watch: PositionOptions,
    pub ip_endpoint: String,
    pub poll_interval_secs: u64,
    pub backends: Vec<String>,
    pub probe_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fallback: FallbackSettings::default(),
            one_shot: PositionOptions::ONE_SHOT,
            watch: PositionOptions::WATCH,
            ip_endpoint: DEFAULT_IP_ENDPOINT.into(),
            poll_interval_secs: 60,
            backends: DEFAULT_BACKENDS.iter().map(|s| s.to_string()).collect(),
            probe_timeout_ms: 3_000,
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".leafcast")
            .join("config.json")
    }

    /// Load from the default path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings: Settings = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        info!(path = %path.display(), "config loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fallback.coordinates().is_valid() {
            return Err(ConfigError::Invalid(format!(
                "fallback coordinates out of range: {}, {}",
                self.fallback.latitude, self.fallback.longitude
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be positive".into()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe_timeout_ms must be positive".into()));
        }
        if self.ip_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("ip_endpoint is empty".into()));
        }
        Ok(())
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            fallback: self.fallback.coordinates(),
            one_shot: self.one_shot,
            watch: self.watch,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
