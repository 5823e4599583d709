//! LocationProvider: best-effort position with deterministic fallback.
//!
//! Mount flow:  disabled → fallback
//!              no platform → fallback (Unavailable)
//!              one-shot request + standing watch → Live samples, or fallback on error
//!
//! Both platform requests feed one state cell and the last write wins. Each
//! acquisition cycle has an epoch; teardown bumps it under the writer lock so
//! callbacks from a cancelled cycle are dropped.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::service::{LocationService, PositionCallback};
use super::types::{
    Coordinates, PositionError, PositionErrorKind, PositionOptions, PositionSource, PositionState,
    WatchId, DEFAULT_FALLBACK,
};

/// Tunables for a provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderOptions {
    /// Substituted whenever no real reading is available.
    pub fallback: Coordinates,
    pub one_shot: PositionOptions,
    pub watch: PositionOptions,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            fallback: DEFAULT_FALLBACK,
            one_shot: PositionOptions::ONE_SHOT,
            watch: PositionOptions::WATCH,
        }
    }
}

/// Observable phase of the acquisition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPhase {
    Disabled,
    Acquiring,
    Resolved,
    DeniedFallback,
    UnavailableFallback,
}

/// Shared between the provider and the platform callbacks.
struct Cell {
    epoch: Mutex<u64>,
    tx: watch::Sender<PositionState>,
}

impl Cell {
    /// Apply `f` to the state if `epoch` is still current.
    fn write(&self, epoch: u64, f: impl FnOnce(&mut PositionState)) -> bool {
        let current = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != epoch {
            return false;
        }
        self.tx.send_modify(f);
        true
    }

    /// Invalidate every callback of the current cycle and return the new epoch.
    fn advance(&self) -> u64 {
        let mut current = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *current += 1;
        *current
    }
}

/// Owns one standing platform subscription; cancels it on drop.
struct WatchGuard {
    platform: Arc<dyn LocationService>,
    id: WatchId,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        debug!(watch = %self.id, platform = self.platform.name(), "clearing watch");
        self.platform.clear_watch(self.id);
    }
}

/// Produces a continuously updated [`PositionState`].
///
/// The provider is mounted on construction. Changing the enablement flag
/// restarts acquisition; dropping the provider releases the platform
/// subscription.
pub struct LocationProvider {
    platform: Option<Arc<dyn LocationService>>,
    options: ProviderOptions,
    cell: Arc<Cell>,
    guard: Option<WatchGuard>,
    enabled: bool,
}

impl LocationProvider {
    /// Mount with the default policies and fallback.
    pub fn mount(platform: Option<Arc<dyn LocationService>>, enabled: bool) -> Self {
        Self::mount_with(platform, ProviderOptions::default(), enabled)
    }

    pub fn mount_with(
        platform: Option<Arc<dyn LocationService>>,
        options: ProviderOptions,
        enabled: bool,
    ) -> Self {
        let (tx, _) = watch::channel(PositionState::loading());
        let mut provider = Self {
            platform,
            options,
            cell: Arc::new(Cell {
                epoch: Mutex::new(0),
                tx,
            }),
            guard: None,
            enabled,
        };
        provider.start();
        provider
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PositionState {
        self.cell.tx.borrow().clone()
    }

    /// A receiver notified on every state write.
    pub fn subscribe(&self) -> watch::Receiver<PositionState> {
        self.cell.tx.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    /// True while a standing platform subscription is registered.
    pub fn has_subscription(&self) -> bool {
        self.guard.is_some()
    }

    /// True when the standing subscription will deliver further samples.
    pub fn expects_updates(&self) -> bool {
        self.guard
            .as_ref()
            .is_some_and(|guard| guard.platform.is_continuous())
    }

    pub fn phase(&self) -> ProviderPhase {
        if !self.enabled {
            return ProviderPhase::Disabled;
        }
        let state = self.cell.tx.borrow();
        if state.is_loading {
            return ProviderPhase::Acquiring;
        }
        match state.source {
            Some(PositionSource::Live) => ProviderPhase::Resolved,
            Some(PositionSource::Denied) => ProviderPhase::DeniedFallback,
            Some(PositionSource::Unavailable) => ProviderPhase::UnavailableFallback,
            Some(PositionSource::Fallback) | None => ProviderPhase::Disabled,
        }
    }

    /// Change the enablement flag. A changed value restarts acquisition from
    /// the initial state; the same value is a no-op.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        info!(enabled, "location enablement changed, restarting");
        self.teardown();
        self.enabled = enabled;
        self.start();
    }

    fn start(&mut self) {
        let epoch = self.cell.advance();
        let fallback = self.options.fallback;

        if !self.enabled {
            info!(%fallback, "real-time location disabled, using default location");
            self.cell.write(epoch, |s| {
                *s = PositionState::resolved(fallback, PositionSource::Fallback)
            });
            return;
        }

        let Some(platform) = self.platform.clone() else {
            warn!(%fallback, "location capability absent, using default location");
            self.cell.write(epoch, |s| {
                *s = PositionState::resolved(fallback, PositionSource::Unavailable)
            });
            return;
        };

        // Keep the previous reading visible while the new cycle acquires.
        self.cell.write(epoch, |s| s.is_loading = true);

        info!(platform = platform.name(), "requesting location");
        let callback = self.callback(epoch);
        platform.get_current_position(self.options.one_shot, callback.clone());
        let id = platform.watch_position(self.options.watch, callback);
        debug!(watch = %id, "standing subscription registered");
        self.guard = Some(WatchGuard { platform, id });
    }

    fn teardown(&mut self) {
        // Bump first so nothing from the old cycle lands after the watch is cleared.
        self.cell.advance();
        self.guard.take();
    }

    fn callback(&self, epoch: u64) -> PositionCallback {
        let cell: Weak<Cell> = Arc::downgrade(&self.cell);
        let fallback = self.options.fallback;
        Arc::new(move |result: Result<Coordinates, PositionError>| {
            let Some(cell) = cell.upgrade() else {
                return;
            };
            let accepted = match result {
                Ok(coords) => cell.write(epoch, |s| {
                    *s = PositionState::resolved(coords, PositionSource::Live)
                }),
                Err(err) => {
                    let source = fallback_source(&err);
                    let accepted = cell.write(epoch, |s| {
                        *s = PositionState::resolved(fallback, source)
                    });
                    if accepted {
                        warn!(
                            kind = ?err.kind,
                            detail = %err.message,
                            "{} Using default location {}",
                            err.user_message(),
                            fallback
                        );
                    }
                    accepted
                }
            };
            if !accepted {
                debug!(epoch, "dropped callback from a cancelled acquisition");
            }
        })
    }
}

impl Drop for LocationProvider {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn fallback_source(err: &PositionError) -> PositionSource {
    match err.kind {
        PositionErrorKind::PermissionDenied => PositionSource::Denied,
        PositionErrorKind::PositionUnavailable
        | PositionErrorKind::Timeout
        | PositionErrorKind::Unknown => PositionSource::Unavailable,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Records every request and lets the test fire callbacks by hand.
    #[derive(Default)]
    pub(crate) struct ScriptedService {
        pub one_shots: Mutex<Vec<(PositionOptions, PositionCallback)>>,
        pub watches: Mutex<Vec<(WatchId, PositionOptions, PositionCallback)>>,
        pub cleared: Mutex<Vec<WatchId>>,
        next_id: AtomicU64,
    }

    impl ScriptedService {
        pub fn fire_one_shot(&self, result: Result<Coordinates, PositionError>) {
            let cb = self.one_shots.lock().unwrap().last().unwrap().1.clone();
            cb(result);
        }

        pub fn fire_watch(&self, index: usize, result: Result<Coordinates, PositionError>) {
            let cb = self.watches.lock().unwrap()[index].2.clone();
            cb(result);
        }

        pub fn one_shot_count(&self) -> usize {
            self.one_shots.lock().unwrap().len()
        }

        pub fn watch_count(&self) -> usize {
            self.watches.lock().unwrap().len()
        }

        pub fn cleared(&self) -> Vec<WatchId> {
            self.cleared.lock().unwrap().clone()
        }
    }

    impl LocationService for ScriptedService {
        fn get_current_position(&self, options: PositionOptions, callback: PositionCallback) {
            self.one_shots.lock().unwrap().push((options, callback));
        }

        fn watch_position(&self, options: PositionOptions, callback: PositionCallback) -> WatchId {
            let id = WatchId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.watches.lock().unwrap().push((id, options, callback));
            id
        }

        fn clear_watch(&self, id: WatchId) {
            self.cleared.lock().unwrap().push(id);
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn mounted(enabled: bool) -> (LocationProvider, Arc<ScriptedService>) {
        let service = Arc::new(ScriptedService::default());
        let platform: Arc<dyn LocationService> = service.clone();
        (LocationProvider::mount(Some(platform), enabled), service)
    }

    fn assert_fallback(state: &PositionState) {
        assert!(!state.is_loading);
        assert!(state.error_message.is_none());
        assert_relative_eq!(state.latitude.unwrap(), 28.6139);
        assert_relative_eq!(state.longitude.unwrap(), 77.2090);
    }

    #[test]
    fn test_disabled_uses_fallback_without_platform_calls() {
        let (provider, service) = mounted(false);
        let state = provider.state();
        assert_fallback(&state);
        assert_eq!(state.source, Some(PositionSource::Fallback));
        assert_eq!(provider.phase(), ProviderPhase::Disabled);
        assert_eq!(service.one_shot_count(), 0);
        assert_eq!(service.watch_count(), 0);
        assert!(!provider.has_subscription());
    }

    #[test]
    fn test_capability_absent_uses_fallback() {
        let provider = LocationProvider::mount(None, true);
        let state = provider.state();
        assert_fallback(&state);
        assert_eq!(state.source, Some(PositionSource::Unavailable));
        assert!(!provider.has_subscription());
    }

    #[test]
    fn test_acquiring_starts_both_requests_with_policies() {
        let (provider, service) = mounted(true);
        assert_eq!(provider.phase(), ProviderPhase::Acquiring);
        assert!(provider.state().is_loading);
        assert!(provider.state().coordinates().is_none());

        let one_shot = service.one_shots.lock().unwrap()[0].0;
        assert_eq!(one_shot, PositionOptions::ONE_SHOT);
        let watch = service.watches.lock().unwrap()[0].1;
        assert_eq!(watch, PositionOptions::WATCH);
        assert!(provider.has_subscription());
    }

    #[test]
    fn test_one_shot_success() {
        let (provider, service) = mounted(true);
        service.fire_one_shot(Ok(Coordinates::new(12.34, 56.78)));
        let state = provider.state();
        assert!(!state.is_loading);
        assert_eq!(state.latitude, Some(12.34));
        assert_eq!(state.longitude, Some(56.78));
        assert_eq!(provider.phase(), ProviderPhase::Resolved);
    }

    #[test]
    fn test_permission_denied_falls_back_silently() {
        let (provider, service) = mounted(true);
        service.fire_one_shot(Err(PositionError::permission_denied()));
        let state = provider.state();
        assert_fallback(&state);
        assert_eq!(state.source, Some(PositionSource::Denied));
        assert_eq!(provider.phase(), ProviderPhase::DeniedFallback);
        // No retry.
        assert_eq!(service.one_shot_count(), 1);
    }

    #[test]
    fn test_timeout_falls_back_silently() {
        let (provider, service) = mounted(true);
        service.fire_one_shot(Err(PositionError::timeout()));
        let state = provider.state();
        assert_fallback(&state);
        assert_eq!(state.source, Some(PositionSource::Unavailable));
        assert_eq!(provider.phase(), ProviderPhase::UnavailableFallback);
    }

    #[test]
    fn test_unavailable_and_unknown_fall_back() {
        for kind in [PositionErrorKind::PositionUnavailable, PositionErrorKind::Unknown] {
            let (provider, service) = mounted(true);
            service.fire_one_shot(Err(PositionError::new(kind, "boom")));
            assert_fallback(&provider.state());
            assert_eq!(provider.state().source, Some(PositionSource::Unavailable));
        }
    }

    #[test]
    fn test_watch_sample_updates_after_resolution() {
        let (provider, service) = mounted(true);
        service.fire_one_shot(Ok(Coordinates::new(12.34, 56.78)));
        service.fire_watch(0, Ok(Coordinates::new(1.0, 2.0)));
        let state = provider.state();
        assert_eq!(state.latitude, Some(1.0));
        assert_eq!(state.longitude, Some(2.0));
        assert!(!state.is_loading);
    }

    #[test]
    fn test_watch_first_then_one_shot_last_writer_wins() {
        let (provider, service) = mounted(true);
        service.fire_watch(0, Ok(Coordinates::new(1.0, 2.0)));
        assert_eq!(provider.state().coordinates(), Some(Coordinates::new(1.0, 2.0)));
        service.fire_one_shot(Ok(Coordinates::new(3.0, 4.0)));
        assert_eq!(provider.state().coordinates(), Some(Coordinates::new(3.0, 4.0)));
    }

    #[test]
    fn test_one_shot_first_then_watch_last_writer_wins() {
        let (provider, service) = mounted(true);
        service.fire_one_shot(Ok(Coordinates::new(3.0, 4.0)));
        service.fire_watch(0, Ok(Coordinates::new(1.0, 2.0)));
        assert_eq!(provider.state().coordinates(), Some(Coordinates::new(1.0, 2.0)));
    }

    #[test]
    fn test_late_error_overwrites_live_reading() {
        let (provider, service) = mounted(true);
        service.fire_watch(0, Ok(Coordinates::new(1.0, 2.0)));
        service.fire_one_shot(Err(PositionError::timeout()));
        assert_fallback(&provider.state());
    }

    #[test]
    fn test_drop_clears_watch_once() {
        let (provider, service) = mounted(true);
        let id = service.watches.lock().unwrap()[0].0;
        drop(provider);
        assert_eq!(service.cleared(), vec![id]);
    }

    #[test]
    fn test_toggle_cancels_each_subscription_once() {
        let (mut provider, service) = mounted(false);
        provider.set_enabled(true);
        assert_eq!(service.watch_count(), 1);
        let id = service.watches.lock().unwrap()[0].0;
        provider.set_enabled(false);
        assert_eq!(service.cleared(), vec![id]);
        assert_fallback(&provider.state());
        drop(provider);
        assert_eq!(service.cleared(), vec![id]);
    }

    #[test]
    fn test_callbacks_after_cancellation_are_ignored() {
        let (mut provider, service) = mounted(true);
        provider.set_enabled(false);
        let before = provider.state();
        service.fire_watch(0, Ok(Coordinates::new(1.0, 2.0)));
        service.fire_one_shot(Ok(Coordinates::new(5.0, 6.0)));
        assert_eq!(provider.state(), before);
    }

    #[test]
    fn test_stale_cycle_does_not_leak_into_new_cycle() {
        let (mut provider, service) = mounted(true);
        provider.set_enabled(false);
        provider.set_enabled(true);
        assert_eq!(service.watch_count(), 2);
        // Old watch fires; new cycle is still acquiring.
        service.fire_watch(0, Ok(Coordinates::new(1.0, 2.0)));
        assert!(provider.state().is_loading);
        service.fire_watch(1, Ok(Coordinates::new(9.0, 8.0)));
        assert_eq!(provider.state().coordinates(), Some(Coordinates::new(9.0, 8.0)));
    }

    #[test]
    fn test_reenable_keeps_previous_value_while_loading() {
        let (mut provider, _service) = mounted(false);
        provider.set_enabled(true);
        let state = provider.state();
        assert!(state.is_loading);
        assert_eq!(state.coordinates(), Some(DEFAULT_FALLBACK));
    }

    #[test]
    fn test_expects_updates_follows_platform() {
        let (provider, _service) = mounted(true);
        assert!(provider.expects_updates());

        let (disabled, _service) = mounted(false);
        assert!(!disabled.expects_updates());
    }

    #[test]
    fn test_same_flag_is_noop() {
        let (mut provider, service) = mounted(true);
        provider.set_enabled(true);
        assert_eq!(service.watch_count(), 1);
        assert!(service.cleared().is_empty());
    }

    #[test]
    fn test_custom_fallback() {
        let options = ProviderOptions {
            fallback: Coordinates::new(59.3293, 18.0686),
            ..ProviderOptions::default()
        };
        let provider = LocationProvider::mount_with(None, options, true);
        assert_eq!(provider.state().coordinates(), Some(Coordinates::new(59.3293, 18.0686)));
    }

    #[test]
    fn test_subscriber_is_notified() {
        let (provider, service) = mounted(true);
        let mut rx = provider.subscribe();
        assert!(!rx.has_changed().unwrap());
        service.fire_one_shot(Ok(Coordinates::new(12.34, 56.78)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().latitude, Some(12.34));
    }

    #[test]
    fn test_callbacks_from_other_threads() {
        let (provider, service) = mounted(true);
        let cb = service.watches.lock().unwrap()[0].2.clone();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cb = cb.clone();
                std::thread::spawn(move || cb(Ok(Coordinates::new(i as f64, i as f64))))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let state = provider.state();
        assert!(!state.is_loading);
        assert_eq!(state.latitude, state.longitude);
    }
}
