//! Core types for the location subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default city used whenever no real reading is available (New Delhi).
pub const DEFAULT_FALLBACK: Coordinates = Coordinates {
    latitude: 28.6139,
    longitude: 77.2090,
};

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Latitude in [-90, 90] and longitude in [-180, 180], both finite.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.latitude >= 0.0 { 'N' } else { 'S' };
        let ew = if self.longitude >= 0.0 { 'E' } else { 'W' };
        write!(
            f,
            "{:.4}\u{00B0}{}, {:.4}\u{00B0}{}",
            self.latitude.abs(),
            ns,
            self.longitude.abs(),
            ew
        )
    }
}

/// Where the coordinates in a [`PositionState`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    /// A real reading delivered by the platform.
    Live,
    /// Location queries are disabled.
    Fallback,
    /// The platform refused permission.
    Denied,
    /// No capability, timeout, or any other platform failure.
    Unavailable,
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Fallback => write!(f, "Fallback"),
            Self::Denied => write!(f, "Denied"),
            Self::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// The value a consumer observes.
///
/// While `is_loading` is true the coordinates hold the previous known value
/// (initially `None`). Once it is false both coordinates are `Some`.
/// `error_message` stays `None`: failures are replaced by the fallback
/// coordinate and reported through `source` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub error_message: Option<String>,
    pub is_loading: bool,
    #[serde(default)]
    pub source: Option<PositionSource>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PositionState {
    /// The state a freshly mounted provider starts in.
    pub fn loading() -> Self {
        Self {
            latitude: None,
            longitude: None,
            error_message: None,
            is_loading: true,
            source: None,
            updated_at: None,
        }
    }

    pub(crate) fn resolved(coords: Coordinates, source: PositionSource) -> Self {
        Self {
            latitude: Some(coords.latitude),
            longitude: Some(coords.longitude),
            error_message: None,
            is_loading: false,
            source: Some(source),
            updated_at: Some(Utc::now()),
        }
    }

    /// Both coordinates, if a reading (real or fallback) is present.
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }

    /// True when the coordinates are a real platform reading.
    pub fn is_live(&self) -> bool {
        self.source == Some(PositionSource::Live)
    }
}

impl Default for PositionState {
    fn default() -> Self {
        Self::loading()
    }
}

/// Error categories reported by a platform location service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unknown,
}

/// A failure delivered through a position callback.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct PositionError {
    pub kind: PositionErrorKind,
    pub message: String,
}

impl PositionError {
    pub fn new(kind: PositionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn permission_denied() -> Self {
        Self::new(PositionErrorKind::PermissionDenied, "permission denied")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(PositionErrorKind::PositionUnavailable, message)
    }

    pub fn timeout() -> Self {
        Self::new(PositionErrorKind::Timeout, "request timed out")
    }

    /// The message a user would have seen before errors were hidden.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            PositionErrorKind::PermissionDenied => {
                "Location permission denied. Using default location."
            }
            PositionErrorKind::PositionUnavailable => "Location information is unavailable.",
            PositionErrorKind::Timeout => "The request to get your location timed out.",
            PositionErrorKind::Unknown => "Unable to retrieve your location",
        }
    }
}

/// Request options handed to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    /// Upper bound on the wait; `None` means wait indefinitely.
    pub timeout_ms: Option<u64>,
    /// Oldest cached sample the platform may hand back.
    pub max_cache_age_ms: u64,
}

impl PositionOptions {
    /// One-shot acquisition: high accuracy, 10 s bound, 5 min cache.
    pub const ONE_SHOT: Self = Self {
        high_accuracy: true,
        timeout_ms: Some(10_000),
        max_cache_age_ms: 300_000,
    };

    /// Standing subscription: high accuracy, 5 min cache, no timeout.
    pub const WATCH: Self = Self {
        high_accuracy: true,
        timeout_ms: None,
        max_cache_age_ms: 300_000,
    };
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self::ONE_SHOT
    }
}

/// Handle for a standing subscription, issued by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}
