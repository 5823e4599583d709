//! Location subsystem for Leafcast.
//!
//! Provides the position state machine, the platform capability it consumes,
//! IP-based and fixed platform services, and a last-fix cache.

pub mod cache;
pub mod provider;
pub mod providers;
pub mod service;
pub mod types;

pub use cache::FixCache;
pub use provider::{LocationProvider, ProviderOptions, ProviderPhase};
pub use providers::{FixedLocationService, IpLocationService, DEFAULT_IP_ENDPOINT};
pub use service::{LocationService, PositionCallback};
pub use types::{
    Coordinates, PositionError, PositionErrorKind, PositionOptions, PositionSource, PositionState,
    WatchId, DEFAULT_FALLBACK,
};
