//! The platform capability a [`LocationProvider`](super::LocationProvider) consumes.

use std::sync::Arc;

use super::types::{Coordinates, PositionError, PositionOptions, WatchId};

/// Success-or-error callback invoked by the platform, possibly from another thread.
pub type PositionCallback = Arc<dyn Fn(Result<Coordinates, PositionError>) + Send + Sync>;

/// A platform location service.
///
/// Both requests are notify-on-ready: they return immediately and deliver
/// results through the callback. A watch keeps delivering samples until
/// [`clear_watch`](LocationService::clear_watch) is called for its id.
pub trait LocationService: Send + Sync {
    /// Request the current position once. The platform must honour
    /// `options.timeout_ms` and deliver a `Timeout` error when it elapses.
    fn get_current_position(&self, options: PositionOptions, callback: PositionCallback);

    /// Register a standing subscription.
    fn watch_position(&self, options: PositionOptions, callback: PositionCallback) -> WatchId;

    /// Cancel a standing subscription. Unknown ids are ignored.
    fn clear_watch(&self, id: WatchId);

    /// Whether a watch keeps producing samples after the first one.
    fn is_continuous(&self) -> bool {
        true
    }

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "platform"
    }
}
