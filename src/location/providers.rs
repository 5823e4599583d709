//! Platform location services: IP geolocation and fixed coordinates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::cache::FixCache;
use super::service::{LocationService, PositionCallback};
use super::types::{Coordinates, PositionError, PositionErrorKind, PositionOptions, WatchId};

pub const DEFAULT_IP_ENDPOINT: &str = "https://ipapi.co/json/";

const USER_AGENT: &str = "Leafcast/0.3 (plant-diagnosis-client)";

// ─── Watch bookkeeping ──────────────────────────────────────────

/// Cancellation flag a watch worker sleeps on.
#[derive(Default)]
struct WatchSignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl WatchSignal {
    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `period`; returns true if cancelled meanwhile.
    fn wait(&self, period: Duration) -> bool {
        let guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, period, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[derive(Default)]
struct WatchRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<WatchId, Arc<WatchSignal>>>,
}

impl WatchRegistry {
    fn register(&self) -> (WatchId, Arc<WatchSignal>) {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let signal = Arc::new(WatchSignal::default());
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, signal.clone());
        (id, signal)
    }

    fn cancel(&self, id: WatchId) -> bool {
        let removed = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ─── IP-based geolocation ───────────────────────────────────────

#[derive(Deserialize)]
struct IpApiResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
    city: Option<String>,
    country_name: Option<String>,
    /// ipapi reports rate limiting and bad input in-band.
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Location service backed by an IP geolocation endpoint.
///
/// One-shot requests answer from the fix cache when a fix is young enough,
/// otherwise fetch on a worker thread. Each watch runs its own polling worker
/// until cleared, sampling once per poll interval starting one interval after
/// registration.
pub struct IpLocationService {
    endpoint: String,
    poll_interval: Duration,
    cache: Arc<FixCache>,
    watches: WatchRegistry,
}

impl IpLocationService {
    pub fn new(endpoint: impl Into<String>, poll_interval: Duration, cache: Arc<FixCache>) -> Self {
        Self {
            endpoint: endpoint.into(),
            poll_interval,
            cache,
            watches: WatchRegistry::default(),
        }
    }

    /// Number of watches not yet cleared.
    pub fn active_watches(&self) -> usize {
        self.watches.len()
    }

    fn sample(
        endpoint: &str,
        cache: &FixCache,
        max_cache_age_ms: u64,
        timeout: Option<Duration>,
    ) -> Result<Coordinates, PositionError> {
        if let Some(fix) = cache.get(max_cache_age_ms) {
            debug!(%fix, "using cached fix");
            return Ok(fix);
        }
        let fix = ip_geolocate(endpoint, timeout)?;
        cache.put(fix, "ip");
        Ok(fix)
    }
}

impl LocationService for IpLocationService {
    fn get_current_position(&self, options: PositionOptions, callback: PositionCallback) {
        if let Some(fix) = self.cache.get(options.max_cache_age_ms) {
            debug!(%fix, "one-shot answered from cache");
            callback(Ok(fix));
            return;
        }
        let endpoint = self.endpoint.clone();
        let cache = self.cache.clone();
        let timeout = options.timeout_ms.map(Duration::from_millis);
        thread::spawn(move || {
            callback(Self::sample(&endpoint, &cache, options.max_cache_age_ms, timeout))
        });
    }

    fn watch_position(&self, options: PositionOptions, callback: PositionCallback) -> WatchId {
        let (id, signal) = self.watches.register();
        let endpoint = self.endpoint.clone();
        let cache = self.cache.clone();
        let period = self.poll_interval;
        if options.high_accuracy {
            debug!(watch = %id, "high accuracy requested; IP geolocation is city-level");
        }

        // A stalled endpoint must not outlive one poll period.
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(period);

        // The one-shot request covers the initial fix, so the first sample
        // waits a full period.
        thread::spawn(move || loop {
            if signal.wait(period) {
                break;
            }
            let result = Self::sample(&endpoint, &cache, options.max_cache_age_ms, Some(timeout));
            if signal.is_cancelled() {
                break;
            }
            callback(result);
        });
        info!(watch = %id, interval_secs = period.as_secs(), "ip watch started");
        id
    }

    fn clear_watch(&self, id: WatchId) {
        if self.watches.cancel(id) {
            info!(watch = %id, "ip watch cleared");
        }
    }

    fn name(&self) -> &'static str {
        "ip"
    }
}

/// Fetch a fix from an ipapi-compatible endpoint.
pub fn ip_geolocate(endpoint: &str, timeout: Option<Duration>) -> Result<Coordinates, PositionError> {
    let mut request = ureq::get(endpoint).set("User-Agent", USER_AGENT);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let response = request.call().map_err(map_ureq_error)?;

    let r: IpApiResult = response
        .into_json()
        .map_err(|e| PositionError::new(PositionErrorKind::Unknown, e.to_string()))?;

    if r.error {
        return Err(PositionError::unavailable(
            r.reason.unwrap_or_else(|| "provider reported an error".into()),
        ));
    }

    let lat = r
        .latitude
        .ok_or_else(|| PositionError::new(PositionErrorKind::Unknown, "no latitude"))?;
    let lon = r
        .longitude
        .ok_or_else(|| PositionError::new(PositionErrorKind::Unknown, "no longitude"))?;
    let fix = Coordinates::new(lat, lon);
    if !fix.is_valid() {
        return Err(PositionError::new(
            PositionErrorKind::Unknown,
            format!("out-of-range coordinates {lat}, {lon}"),
        ));
    }

    debug!(
        city = r.city.as_deref().unwrap_or("Unknown"),
        country = r.country_name.as_deref().unwrap_or(""),
        %fix,
        "ip geolocation success"
    );
    Ok(fix)
}

fn map_ureq_error(err: ureq::Error) -> PositionError {
    match err {
        ureq::Error::Status(code @ (401 | 403), _) => PositionError::new(
            PositionErrorKind::PermissionDenied,
            format!("endpoint refused access (HTTP {code})"),
        ),
        ureq::Error::Status(code, _) => PositionError::unavailable(format!("HTTP {code}")),
        ureq::Error::Transport(t) => {
            if is_timeout(&t) {
                PositionError::timeout()
            } else {
                PositionError::unavailable(t.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

// ─── Fixed coordinates ──────────────────────────────────────────

/// Delivers operator-supplied coordinates on every request. A watch delivers
/// once at registration and never again.
///
/// Out-of-range coordinates are reported as `PositionUnavailable`.
pub struct FixedLocationService {
    coords: Coordinates,
    watches: WatchRegistry,
}

impl FixedLocationService {
    pub fn new(coords: Coordinates) -> Self {
        Self {
            coords,
            watches: WatchRegistry::default(),
        }
    }

    pub fn active_watches(&self) -> usize {
        self.watches.len()
    }

    fn reading(&self) -> Result<Coordinates, PositionError> {
        if self.coords.is_valid() {
            Ok(self.coords)
        } else {
            warn!(coords = ?self.coords, "manual coordinates out of range");
            Err(PositionError::unavailable("manual coordinates out of range"))
        }
    }
}

impl LocationService for FixedLocationService {
    fn get_current_position(&self, _options: PositionOptions, callback: PositionCallback) {
        callback(self.reading());
    }

    fn watch_position(&self, _options: PositionOptions, callback: PositionCallback) -> WatchId {
        let (id, _) = self.watches.register();
        callback(self.reading());
        id
    }

    fn clear_watch(&self, id: WatchId) {
        self.watches.cancel(id);
    }

    fn is_continuous(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}
