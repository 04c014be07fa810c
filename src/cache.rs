use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CacheSettings;
use crate::errors::AppResult;
use crate::geo::Coordinates;

/// Bumped whenever entries written by older builds can no longer be trusted.
/// Version 2 entries are the first ones validated against a city anchor.
pub const GEO_CACHE_VERSION: u32 = 2;

const KEY_SEPARATOR: &str = "|||";

pub trait CacheBackend: Send + Sync {
    fn load(&self) -> AppResult<Option<String>>;
    fn save(&self, blob: &str) -> AppResult<()>;
}

#[derive(Default)]
pub struct MemoryBackend {
    blob: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    pub fn snapshot(&self) -> Option<String> {
        self.blob.lock().clone()
    }
}

impl CacheBackend for MemoryBackend {
    fn load(&self) -> AppResult<Option<String>> {
        Ok(self.blob.lock().clone())
    }

    fn save(&self, blob: &str) -> AppResult<()> {
        *self.blob.lock() = Some(blob.to_string());
        Ok(())
    }
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStore {
    pub version: u32,
    #[serde(default)]
    pub entries: HashMap<String, CacheEntry>,
}

impl CacheStore {
    fn empty() -> Self {
        Self {
            version: GEO_CACHE_VERSION,
            entries: HashMap::new(),
        }
    }
}

/// Persistent `(place, city) -> coordinates` map with TTL, version wipe and
/// oldest-first eviction.
pub struct GeoCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    store: Mutex<CacheStore>,
}

impl GeoCache {
    pub fn open(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self::with_clock(backend, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn CacheBackend>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = read_store(backend.as_ref()).unwrap_or_else(|err| {
            warn!(?err, "geo cache backend unreadable; starting empty");
            CacheStore::empty()
        });
        Self {
            backend,
            clock,
            settings,
            store: Mutex::new(store),
        }
    }

    pub fn cache_key(place: &str, city: &str) -> String {
        format!("{place}{KEY_SEPARATOR}{city}")
    }

    pub fn get(&self, place: &str, city: &str) -> Option<Coordinates> {
        let now = self.clock.now_millis();
        let store = self.store.lock();
        let entry = store.entries.get(&Self::cache_key(place, city))?;
        if now - entry.timestamp < self.settings.ttl_ms {
            Some(Coordinates::new(entry.lat, entry.lng))
        } else {
            None
        }
    }

    pub fn contains(&self, place: &str, city: &str) -> bool {
        self.get(place, city).is_some()
    }

    /// Read-modify-write against the backend so concurrent writers only
    /// lose each other's entries to last-writer-wins, never corrupt them.
    /// When the backend cannot be read the in-memory store is the base.
    pub fn put(&self, place: &str, city: &str, coordinates: Coordinates) -> AppResult<()> {
        let mut store = self.store.lock();
        let mut fresh = match read_store(self.backend.as_ref()) {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(?err, "geo cache backend unreadable; merging into memory copy");
                store.clone()
            }
        };
        fresh.entries.insert(
            Self::cache_key(place, city),
            CacheEntry {
                lat: coordinates.lat,
                lng: coordinates.lng,
                timestamp: self.clock.now_millis(),
            },
        );
        let evicted = evict_oldest(&mut fresh, &self.settings);
        if evicted > 0 {
            debug!(evicted, remaining = fresh.entries.len(), "evicted stale geo cache entries");
        }
        let serialized = serde_json::to_string(&fresh)?;
        *store = fresh;
        self.backend.save(&serialized)
    }

    /// Re-reads the backend; keeps the current entries if it is unreadable.
    pub fn reload(&self) {
        match read_store(self.backend.as_ref()) {
            Ok(fresh) => *self.store.lock() = fresh,
            Err(err) => warn!(?err, "geo cache reload failed; keeping memory copy"),
        }
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backend read failures propagate; undecodable or outdated blobs come back
/// as an empty store.
fn read_store(backend: &dyn CacheBackend) -> AppResult<CacheStore> {
    let Some(blob) = backend.load()? else {
        return Ok(CacheStore::empty());
    };

    Ok(match serde_json::from_str::<CacheStore>(&blob) {
        Ok(store) if store.version == GEO_CACHE_VERSION => store,
        Ok(store) => {
            info!(
                found = store.version,
                expected = GEO_CACHE_VERSION,
                entries = store.entries.len(),
                "discarding geo cache written by another version"
            );
            wipe(backend)
        }
        Err(err) => {
            warn!(?err, "geo cache blob is corrupted; starting empty");
            CacheStore::empty()
        }
    })
}

fn wipe(backend: &dyn CacheBackend) -> CacheStore {
    let store = CacheStore::empty();
    match serde_json::to_string(&store) {
        Ok(serialized) => {
            if let Err(err) = backend.save(&serialized) {
                warn!(?err, "failed to persist wiped geo cache");
            }
        }
        Err(err) => warn!(?err, "failed to serialize empty geo cache"),
    }
    store
}

fn evict_oldest(store: &mut CacheStore, settings: &CacheSettings) -> usize {
    let total = store.entries.len();
    if total <= settings.capacity {
        return 0;
    }

    let by_fraction = (total as f64 * settings.evict_fraction).ceil() as usize;
    let count = by_fraction.max(total - settings.capacity).min(total);

    let mut by_age: Vec<(i64, String)> = store
        .entries
        .iter()
        .map(|(key, entry)| (entry.timestamp, key.clone()))
        .collect();
    by_age.sort();
    for (_, key) in by_age.into_iter().take(count) {
        store.entries.remove(&key);
    }
    count
}
