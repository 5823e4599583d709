//! File-based last-fix cache at ~/.leafcast/last_fix.json.
//!
//! Backs the "accept a cached sample up to N ms old" option of platform
//! requests. A missing or unreadable file behaves as an empty cache.

use super::types::Coordinates;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct FixEntry {
    latitude: f64,
    longitude: f64,
    timestamp_ms: i64,
    #[serde(default)]
    source_name: Option<String>,
}

/// The last successful fix, shared by every request of a platform service.
pub struct FixCache {
    path: Option<PathBuf>,
    entry: Mutex<Option<FixEntry>>,
}

impl FixCache {
    /// Load from the default location (~/.leafcast/last_fix.json).
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load from a specific path (for testing).
    pub fn load_from(path: PathBuf) -> Self {
        let entry = Self::read_file(&path);
        Self {
            path: Some(path),
            entry: Mutex::new(entry),
        }
    }

    /// A cache that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entry: Mutex::new(None),
        }
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".leafcast")
            .join("last_fix.json")
    }

    fn read_file(path: &Path) -> Option<FixEntry> {
        let data = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt fix cache");
                None
            }
        }
    }

    /// The cached fix if it is no older than `max_age_ms`.
    pub fn get(&self, max_age_ms: u64) -> Option<Coordinates> {
        let guard = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = guard.as_ref()?;

        let now = chrono::Utc::now().timestamp_millis();
        let age = now - entry.timestamp_ms;
        if age < 0 || age as u64 > max_age_ms {
            debug!(age_ms = age, max_age_ms, "cached fix too old");
            return None;
        }
        Some(Coordinates::new(entry.latitude, entry.longitude))
    }

    /// Record a fresh fix and persist it.
    pub fn put(&self, coords: Coordinates, source_name: &str) {
        let entry = FixEntry {
            latitude: coords.latitude,
            longitude: coords.longitude,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            source_name: Some(source_name.to_string()),
        };
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = Some(entry.clone());
        self.persist(&entry);
    }

    fn persist(&self, entry: &FixEntry) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let result = serde_json::to_string_pretty(entry)
            .map_err(std::io::Error::from)
            .and_then(|json| fs::write(path, json));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "could not persist fix cache");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache() -> (FixCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_fix.json");
        (FixCache::load_from(path), dir)
    }

    #[test]
    fn test_put_get() {
        let (cache, _dir) = test_cache();
        assert!(cache.is_empty());
        cache.put(Coordinates::new(59.3293, 18.0686), "ip");
        let fix = cache.get(300_000).unwrap();
        assert!((fix.latitude - 59.3293).abs() < 1e-9);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_expired_fix_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_fix.json");
        let stale = r#"{ "latitude": 1.0, "longitude": 2.0, "timestamp_ms": 1000 }"#;
        fs::write(&path, stale).unwrap();

        let cache = FixCache::load_from(path);
        assert!(!cache.is_empty());
        assert!(cache.get(300_000).is_none());
    }

    #[test]
    fn test_zero_max_age_only_accepts_same_millisecond() {
        let (cache, _dir) = test_cache();
        cache.put(Coordinates::new(1.0, 2.0), "ip");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get(0).is_none());
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("last_fix.json");
        {
            let cache = FixCache::load_from(path.clone());
            cache.put(Coordinates::new(35.6762, 139.6503), "ip");
        }
        let reloaded = FixCache::load_from(path);
        assert_eq!(reloaded.get(300_000), Some(Coordinates::new(35.6762, 139.6503)));
    }

    #[test]
    fn test_corrupt_file_behaves_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_fix.json");
        fs::write(&path, "not json").unwrap();
        let cache = FixCache::load_from(path);
        assert!(cache.is_empty());
        assert!(cache.get(u64::MAX).is_none());
    }

    #[test]
    fn test_in_memory_cache() {
        let cache = FixCache::in_memory();
        cache.put(Coordinates::new(3.0, 4.0), "fixed");
        assert_eq!(cache.get(60_000), Some(Coordinates::new(3.0, 4.0)));
    }
}
