//! Leafcast: user location with deterministic fallback, plus health probing
//! of the plant-diagnosis backends.

pub mod config;
pub mod location;
pub mod probe;
pub mod server;
