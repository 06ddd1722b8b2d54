//! String-keyed cache of lazily-populated value slots with TTL expiry.
//!
//! A lookup never blocks on a fetch: [`TtlCache::get_or_create`] hands back a
//! mutable slot and a [`SlotStatus`], and the caller decides whether to fill
//! it. Expired entries are emptied on lookup; entries nobody looks at again
//! are reclaimed by a sweep that runs at most once per [`SWEEP_INTERVAL`],
//! piggy-backed on insertions.
//!
//! Not thread-safe by itself: wrap it in a mutex and hold the lock only for
//! the lookup/store, never across the fetch.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Minimum time between two opportunistic sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Called with the key and the evicted value whenever an entry expires.
pub type ExpireHook<V> = Box<dyn Fn(&str, V) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache size must be at least 1 (got {0})")]
    InvalidSize(usize),

    #[error("cache allocation failed")]
    OutOfMemory,
}

/// How a slot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Existing, unexpired entry. Its value may still be empty if another
    /// caller allocated it and has not stored a result yet.
    Hit,
    /// Freshly allocated for this key; value is empty.
    New,
    /// Existing entry that had outlived its TTL; value was reset to empty
    /// and the expiry re-armed.
    Expired,
}

/// A mutable view on one cache entry.
pub struct Slot<'a, V> {
    pub status: SlotStatus,
    pub value: &'a mut Option<V>,
}

struct CacheEntry<V> {
    /// `None` when aging is disabled.
    expires_at: Option<Instant>,
    value: Option<V>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now > at)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    expired: u64,
    swept: u64,
}

/// Snapshot of a cache's counters, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub name: String,
    pub capacity: usize,
    pub max_age: Duration,
    pub live: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub swept: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cache \"{}\"", self.name)?;
        writeln!(f, "  capacity : {}", self.capacity)?;
        if self.max_age.is_zero() {
            writeln!(f, "  max age  : disabled")?;
        } else {
            writeln!(f, "  max age  : {}s", self.max_age.as_secs())?;
        }
        writeln!(f, "  live     : {}", self.live)?;
        writeln!(f, "  hits     : {}", self.hits)?;
        writeln!(f, "  misses   : {}", self.misses)?;
        writeln!(f, "  expired  : {}", self.expired)?;
        writeln!(f, "  swept    : {}", self.swept)
    }
}

pub struct TtlCache<V> {
    name: String,
    capacity: usize,
    max_age: Duration,
    entries: HashMap<String, CacheEntry<V>>,
    on_expire: Option<ExpireHook<V>>,
    last_sweep: Instant,
    counters: Counters,
}

impl<V> TtlCache<V> {
    /// Create a cache with room for `size` entries up front.
    ///
    /// `max_age` of zero disables aging: entries then live until removed.
    pub fn new(name: impl Into<String>, size: usize, max_age: Duration) -> Result<Self, CacheError> {
        if size < 1 {
            return Err(CacheError::InvalidSize(size));
        }
        let mut entries = HashMap::new();
        entries
            .try_reserve(size)
            .map_err(|_| CacheError::OutOfMemory)?;
        Ok(TtlCache {
            name: name.into(),
            capacity: size,
            max_age,
            entries,
            on_expire: None,
            last_sweep: Instant::now(),
            counters: Counters::default(),
        })
    }

    /// Install the hook run for every value dropped by expiry.
    pub fn with_expire_hook(mut self, hook: impl Fn(&str, V) + Send + Sync + 'static) -> Self {
        self.on_expire = Some(Box::new(hook));
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_or_create(&mut self, key: &str) -> Result<Slot<'_, V>, CacheError> {
        self.get_or_create_at(key, Instant::now())
    }

    /// Return the slot for `key`, allocating it if absent.
    ///
    /// An entry past its expiry is reported as [`SlotStatus::Expired`] with
    /// its old value handed to the expire hook and its TTL restarted at `now`.
    pub fn get_or_create_at(&mut self, key: &str, now: Instant) -> Result<Slot<'_, V>, CacheError> {
        if !self.entries.contains_key(key) {
            self.maybe_sweep(now);
            self.entries
                .try_reserve(1)
                .map_err(|_| CacheError::OutOfMemory)?;
        }

        let expires_at = self.expiry_from(now);
        let Self {
            entries,
            on_expire,
            counters,
            ..
        } = self;

        let (status, entry) = match entries.entry(key.to_owned()) {
            MapEntry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.is_expired(now) {
                    counters.expired += 1;
                    entry.expires_at = expires_at;
                    if let (Some(hook), Some(old)) = (on_expire.as_ref(), entry.value.take()) {
                        hook(key, old);
                    }
                    debug!(key, "cache entry expired");
                    (SlotStatus::Expired, entry)
                } else {
                    counters.hits += 1;
                    (SlotStatus::Hit, entry)
                }
            }
            MapEntry::Vacant(vacant) => {
                counters.misses += 1;
                let entry = vacant.insert(CacheEntry {
                    expires_at,
                    value: None,
                });
                (SlotStatus::New, entry)
            }
        };

        Ok(Slot {
            status,
            value: &mut entry.value,
        })
    }

    pub fn store(&mut self, key: &str, value: V) -> Result<(), CacheError> {
        self.store_at(key, value, Instant::now())
    }

    /// Put `value` into the slot for `key`, allocating the slot if it was
    /// swept or removed in the meantime. An existing slot keeps its expiry.
    pub fn store_at(&mut self, key: &str, value: V, now: Instant) -> Result<(), CacheError> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = Some(value);
            return Ok(());
        }
        self.maybe_sweep(now);
        self.entries
            .try_reserve(1)
            .map_err(|_| CacheError::OutOfMemory)?;
        let expires_at = self.expiry_from(now);
        self.entries.insert(
            key.to_owned(),
            CacheEntry {
                expires_at,
                value: Some(value),
            },
        );
        Ok(())
    }

    /// Drop the entry for `key` without running the expire hook.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key).and_then(|entry| entry.value)
    }

    /// Drop the entry for `key` only while it holds no value. Returns whether
    /// an entry was removed.
    pub fn remove_unpopulated(&mut self, key: &str) -> bool {
        if self.entries.get(key).is_some_and(|entry| entry.value.is_none()) {
            self.entries.remove(key);
            return true;
        }
        false
    }

    /// Remove every entry that expired before `now`, handing populated values
    /// to the expire hook. Returns the number of entries removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.last_sweep = now;
        if self.max_age.is_zero() {
            return 0;
        }

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                if let (Some(hook), Some(value)) = (self.on_expire.as_ref(), entry.value) {
                    hook(key, value);
                }
            }
        }

        self.counters.swept += expired.len() as u64;
        if !expired.is_empty() {
            debug!(cache = %self.name, removed = expired.len(), "swept expired entries");
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            capacity: self.capacity,
            max_age: self.max_age,
            live: self.entries.len(),
            hits: self.counters.hits,
            misses: self.counters.misses,
            expired: self.counters.expired,
            swept: self.counters.swept,
        }
    }

    fn expiry_from(&self, now: Instant) -> Option<Instant> {
        if self.max_age.is_zero() {
            None
        } else {
            now.checked_add(self.max_age)
        }
    }

    fn maybe_sweep(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) >= SWEEP_INTERVAL {
            self.sweep(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = TtlCache::<u32>::new("t", 0, secs(1)).err();
        assert_eq!(err, Some(CacheError::InvalidSize(0)));
    }

    #[test]
    fn new_then_hit() {
        let mut cache = TtlCache::new("t", 8, secs(60)).unwrap();
        let t0 = Instant::now();

        let slot = cache.get_or_create_at("0", t0).unwrap();
        assert_eq!(slot.status, SlotStatus::New);
        assert!(slot.value.is_none());
        *slot.value = Some(42u32);

        let slot = cache.get_or_create_at("0", t0 + secs(60)).unwrap();
        assert_eq!(slot.status, SlotStatus::Hit);
        assert_eq!(*slot.value, Some(42));
    }

    #[test]
    fn expires_after_max_age_and_rearms() {
        let mut cache = TtlCache::new("t", 8, secs(10)).unwrap();
        let t0 = Instant::now();
        *cache.get_or_create_at("k", t0).unwrap().value = Some("v1");

        let slot = cache.get_or_create_at("k", t0 + secs(11)).unwrap();
        assert_eq!(slot.status, SlotStatus::Expired);
        assert!(slot.value.is_none());
        *slot.value = Some("v2");

        // TTL restarted at t0 + 11
        let slot = cache.get_or_create_at("k", t0 + secs(21)).unwrap();
        assert_eq!(slot.status, SlotStatus::Hit);
        assert_eq!(*slot.value, Some("v2"));
    }

    #[test]
    fn zero_max_age_never_expires() {
        let mut cache = TtlCache::new("t", 8, Duration::ZERO).unwrap();
        let t0 = Instant::now();
        *cache.get_or_create_at("k", t0).unwrap().value = Some(1u8);

        let slot = cache.get_or_create_at("k", t0 + secs(86_400 * 365)).unwrap();
        assert_eq!(slot.status, SlotStatus::Hit);
        assert_eq!(cache.sweep(t0 + secs(86_400 * 365)), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expire_hook_receives_old_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut cache = TtlCache::new("t", 8, secs(5))
            .unwrap()
            .with_expire_hook(move |key, value: u32| sink.lock().unwrap().push((key.to_owned(), value)));

        let t0 = Instant::now();
        *cache.get_or_create_at("a", t0).unwrap().value = Some(1);
        cache.get_or_create_at("a", t0 + secs(6)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![("a".to_owned(), 1)]);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let mut cache = TtlCache::new("t", 8, secs(5)).unwrap();
        let t0 = Instant::now();
        *cache.get_or_create_at("old", t0).unwrap().value = Some(1u32);
        *cache.get_or_create_at("young", t0 + secs(4)).unwrap().value = Some(2u32);

        assert_eq!(cache.sweep(t0 + secs(6)), 1);
        assert_eq!(cache.len(), 1);
        let slot = cache.get_or_create_at("young", t0 + secs(6)).unwrap();
        assert_eq!(slot.status, SlotStatus::Hit);
        assert_eq!(cache.stats().swept, 1);
    }

    #[test]
    fn insertion_triggers_sweep_after_interval() {
        let mut cache = TtlCache::new("t", 8, secs(1)).unwrap();
        let t0 = Instant::now();
        *cache.get_or_create_at("stale", t0).unwrap().value = Some(0u32);

        // Within the interval: no sweep, stale entry still counted as live
        cache.get_or_create_at("other", t0 + secs(2)).unwrap();
        assert_eq!(cache.len(), 2);

        // Past the interval: the insertion sweeps everything expired first
        cache.get_or_create_at("fresh", t0 + SWEEP_INTERVAL + secs(1)).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn store_keeps_existing_expiry() {
        let mut cache = TtlCache::new("t", 8, secs(10)).unwrap();
        let t0 = Instant::now();
        cache.get_or_create_at("k", t0).unwrap();
        cache.store_at("k", 7u32, t0 + secs(9)).unwrap();

        let slot = cache.get_or_create_at("k", t0 + secs(11)).unwrap();
        assert_eq!(slot.status, SlotStatus::Expired);
    }

    #[test]
    fn store_recreates_removed_slot() {
        let mut cache = TtlCache::new("t", 8, secs(10)).unwrap();
        let t0 = Instant::now();
        cache.store_at("k", 3u32, t0).unwrap();
        assert_eq!(*cache.get_or_create_at("k", t0).unwrap().value, Some(3));
        assert_eq!(cache.remove("k"), Some(3));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_unpopulated_spares_filled_slots() {
        let mut cache: TtlCache<u32> = TtlCache::new("t", 4, secs(60)).unwrap();
        cache.get_or_create("empty").unwrap();
        cache.get_or_create("full").unwrap();
        cache.store("full", 7).unwrap();

        assert!(cache.remove_unpopulated("empty"));
        assert!(!cache.remove_unpopulated("full"));
        assert!(!cache.remove_unpopulated("absent"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove("full"), Some(7));
    }

    #[test]
    fn stats_count_hits_misses_and_expiry() {
        let mut cache: TtlCache<u32> = TtlCache::new("dev1", 4, secs(1)).unwrap();
        let t0 = Instant::now();
        cache.get_or_create_at("a", t0).unwrap();
        cache.get_or_create_at("a", t0).unwrap();
        cache.get_or_create_at("a", t0 + secs(2)).unwrap();

        let stats = cache.stats();
        assert_eq!((stats.misses, stats.hits, stats.expired), (1, 1, 1));
        assert_eq!(stats.live, 1);

        let text = stats.to_string();
        assert!(text.contains("cache \"dev1\""));
        assert!(text.contains("capacity : 4"));
        assert!(text.contains("max age  : 1s"));
    }
}
