// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The bounded in-process tier.
//!
//! [`L1Cache`] stores opaque bytes under string keys with a per-entry TTL, evicts the
//! least recently used entries once a byte budget is exceeded, and tracks which keys
//! have a stale-while-revalidate refresh in flight.
//!
//! # Versions
//!
//! Every time a key's resident value changes (insert, overwrite, committed refresh) it is
//! stamped with a fresh version drawn from a cache-wide counter, so versions only ever
//! grow for a key. A refresh remembers the version it started from and can only commit
//! while that version is still current. Invalidation removes the entry, and any later
//! value carries a larger version, so a refresh that started before an invalidation can
//! never bring the old value back.

mod entry;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use strata_tier::Clock;

pub use entry::CacheEntry;
use entry::entry_size;

use crate::Jitter;
use crate::config::L1Config;

/// Relative spread applied to each refresh threshold.
const SWR_JITTER: f64 = 0.1;

/// A hit returned by [`L1Cache::get_with_swr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwrHit {
    /// The cached bytes.
    pub value: Bytes,
    /// `true` for exactly one caller per staleness episode, which should refresh the key.
    pub needs_refresh: bool,
    /// The entry's version, to hand back to [`L1Cache::complete_refresh`].
    pub version: u64,
}

/// Point-in-time view of the in-process tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L1Stats {
    /// Resident entries, including expired ones not yet removed.
    pub entries: usize,
    /// Bytes charged by resident entries.
    pub memory_bytes: usize,
    /// The memory budget.
    pub max_memory_bytes: usize,
    /// Keys with a refresh in flight.
    pub refreshing: usize,
    /// Entries removed to stay within the budget.
    pub evictions: u64,
    /// Entries removed because they expired.
    pub expirations: u64,
}

/// A bounded, thread-safe in-process cache with TTL expiry, LRU eviction and
/// stale-while-revalidate bookkeeping.
///
/// All state sits behind one short-held lock; no method blocks or awaits while holding it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use strata::{Jitter, L1Cache, L1Config};
/// use strata::tier::ClockControl;
///
/// let control = ClockControl::new();
/// let cache = L1Cache::new(L1Config::default())
///     .with_clock(control.to_clock())
///     .with_jitter(Jitter::none());
///
/// let ttl = Duration::from_secs(100);
/// cache.put("k", Bytes::from_static(b"v"), ttl, None);
///
/// let hit = cache.get_with_swr("k", ttl).unwrap();
/// assert!(!hit.needs_refresh);
///
/// control.advance_secs(60);
/// assert!(cache.get_with_swr("k", ttl).unwrap().needs_refresh);
/// assert!(!cache.get_with_swr("k", ttl).unwrap().needs_refresh);
/// ```
#[derive(Debug)]
pub struct L1Cache {
    state: Mutex<State>,
    config: L1Config,
    clock: Clock,
    jitter: Jitter,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    tick: u64,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Slot>,
    // access tick -> key; the first element is the least recently used
    lru: BTreeMap<u64, String>,
    next_tick: u64,
    next_version: u64,
    memory_bytes: usize,
    namespaces: Option<HashMap<String, HashSet<String>>>,
    // key -> version of the entry the in-flight refresh was started from
    refreshing: HashMap<String, u64>,
    evictions: u64,
    expirations: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        let tick = self.tick();
        let version = self.version();

        if let (Some(index), Some(namespace)) = (self.namespaces.as_mut(), entry.namespace()) {
            index.entry(namespace.to_owned()).or_default().insert(key.clone());
        }
        self.memory_bytes += entry.size();
        self.lru.insert(tick, key.clone());
        self.entries.insert(key, Slot { entry, tick, version });
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.lru.remove(&slot.tick);
        self.memory_bytes -= slot.entry.size();

        if let (Some(index), Some(namespace)) = (self.namespaces.as_mut(), slot.entry.namespace()) {
            if let Some(keys) = index.get_mut(namespace) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(namespace);
                }
            }
        }
        Some(slot)
    }

    fn clear_refreshing(&mut self, key: &str, version: u64) {
        if self.refreshing.get(key) == Some(&version) {
            self.refreshing.remove(key);
        }
    }

    fn touch(&mut self, key: &str) {
        let tick = self.tick();
        if let Some(slot) = self.entries.get_mut(key) {
            self.lru.remove(&slot.tick);
            slot.tick = tick;
            self.lru.insert(tick, key.to_owned());
        }
    }

    /// Returns `true` if `key` is resident and unexpired, removing it if it expired.
    fn is_live(&mut self, key: &str, now: Instant) -> bool {
        let expired = match self.entries.get(key) {
            None => return false,
            Some(slot) => slot.entry.is_expired(now),
        };
        if expired {
            self.remove(key);
            self.expirations += 1;
        }
        !expired
    }

    fn evict_to(&mut self, budget: usize) {
        while self.memory_bytes > budget {
            let Some(key) = self.lru.first_key_value().map(|(_, key)| key.clone()) else {
                break;
            };
            if self.remove(&key).is_some() {
                self.evictions += 1;
            } else {
                self.lru.pop_first();
            }
        }
    }
}

impl L1Cache {
    /// Creates an empty cache with the system clock and random jitter.
    #[must_use]
    pub fn new(config: L1Config) -> Self {
        let state = State {
            namespaces: config.namespace_index.then(HashMap::new),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
            config,
            clock: Clock::new_system(),
            jitter: Jitter::random(),
        }
    }

    /// Uses `clock` for expiry and staleness.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `jitter` to spread refresh thresholds.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// The configuration this cache was created with.
    #[must_use]
    pub fn config(&self) -> &L1Config {
        &self.config
    }

    /// Inserts or overwrites `key`.
    ///
    /// Entries larger than the single-entry limit are not admitted; any previous value
    /// for the key is dropped so it cannot be served in place of the newer one. After
    /// inserting, least recently used entries are evicted until the budget is met.
    ///
    /// Returns `true` if the value was admitted.
    pub fn put(&self, key: &str, value: Bytes, ttl: Duration, namespace: Option<&str>) -> bool {
        let now = self.clock.instant();
        let mut state = self.state.lock();

        state.remove(key);
        if entry_size(key, &value) > self.config.entry_limit() {
            return false;
        }

        let entry = CacheEntry::new(key, value, now, ttl, namespace.map(str::to_owned));
        state.insert(key.to_owned(), entry);
        state.evict_to(self.config.max_memory_bytes);
        true
    }

    /// Returns the value for `key` unless it is absent or expired, marking it as most
    /// recently used.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = self.clock.instant();
        let mut state = self.state.lock();
        if !state.is_live(key, now) {
            return None;
        }
        state.touch(key);
        state.entries.get(key).map(|slot| slot.entry.value().clone())
    }

    /// Like [`get`](Self::get), but also reports whether the caller should refresh the key.
    ///
    /// An entry is stale once its age reaches `ttl × swr_threshold_ratio`, spread by ±10%.
    /// Only the first caller to observe a stale entry gets `needs_refresh = true`; the key
    /// then stays in the refreshing set until [`complete_refresh`](Self::complete_refresh),
    /// [`cancel_refresh`](Self::cancel_refresh) or an invalidation.
    #[must_use]
    pub fn get_with_swr(&self, key: &str, ttl: Duration) -> Option<SwrHit> {
        let now = self.clock.instant();
        let base = Duration::try_from_secs_f64(ttl.as_secs_f64() * self.config.swr_threshold_ratio).unwrap_or(ttl);
        let threshold = self.jitter.spread(base, SWR_JITTER);

        let mut state = self.state.lock();
        if !state.is_live(key, now) {
            return None;
        }
        state.touch(key);

        let slot = state.entries.get(key)?;
        let stale = self.config.swr_enabled && slot.entry.age(now) >= threshold;
        let value = slot.entry.value().clone();
        let version = slot.version;
        let needs_refresh = stale && !state.refreshing.contains_key(key);
        if needs_refresh {
            state.refreshing.insert(key.to_owned(), version);
        }

        Some(SwrHit {
            value,
            needs_refresh,
            version,
        })
    }

    /// Commits a refreshed value computed from the entry at `expected_version`.
    ///
    /// Succeeds only if the key is still resident, unexpired at `now`, and still at
    /// `expected_version`. The refreshing mark is cleared whatever the outcome, provided it
    /// still belongs to the refresh started at `expected_version`.
    pub fn complete_refresh(&self, key: &str, expected_version: u64, value: Bytes, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.clear_refreshing(key, expected_version);

        let current = state
            .entries
            .get(key)
            .is_some_and(|slot| slot.version == expected_version && !slot.entry.is_expired(now));
        if !current {
            return false;
        }

        let Some(slot) = state.remove(key) else {
            return false;
        };
        if entry_size(key, &value) > self.config.entry_limit() {
            return false;
        }

        let mut entry = slot.entry;
        entry.replace(key, value, now);
        state.insert(key.to_owned(), entry);
        state.evict_to(self.config.max_memory_bytes);
        true
    }

    /// Clears the refreshing mark for `key` without touching the entry.
    ///
    /// Only the refresh started at `version` can clear the mark; a later refresh of the
    /// re-inserted key keeps its own. Idempotent.
    pub fn cancel_refresh(&self, key: &str, version: u64) {
        self.state.lock().clear_refreshing(key, version);
    }

    /// Removes `key`, returning `true` if it was resident.
    pub fn invalidate_by_key(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.refreshing.remove(key);
        state.remove(key).is_some()
    }

    /// Removes every entry tagged with `namespace`, returning how many were removed.
    pub fn invalidate_by_namespace(&self, namespace: &str) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<String> = match state.namespaces.as_mut() {
            Some(index) => index.remove(namespace).map(|keys| keys.into_iter().collect()).unwrap_or_default(),
            None => state
                .entries
                .iter()
                .filter(|(_, slot)| slot.entry.namespace() == Some(namespace))
                .map(|(key, _)| key.clone())
                .collect(),
        };

        for key in &keys {
            state.refreshing.remove(key);
            state.remove(key);
        }
        keys.len()
    }

    /// Removes every entry, returning how many were removed.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.lru.clear();
        state.refreshing.clear();
        state.memory_bytes = 0;
        if let Some(index) = state.namespaces.as_mut() {
            index.clear();
        }
        count
    }

    /// Returns a copy of the entry for `key` without affecting recency or expiry.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).map(|slot| slot.entry.clone())
    }

    /// The current version of `key`, if resident.
    #[must_use]
    pub fn version(&self, key: &str) -> Option<u64> {
        self.state.lock().entries.get(key).map(|slot| slot.version)
    }

    /// Returns `true` if a refresh is in flight for `key`.
    #[must_use]
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.state.lock().refreshing.contains_key(key)
    }

    /// Resident entries, including expired ones not yet removed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if nothing is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes charged by resident entries.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.state.lock().memory_bytes
    }

    /// A snapshot of size and eviction counters.
    #[must_use]
    pub fn stats(&self) -> L1Stats {
        let state = self.state.lock();
        L1Stats {
            entries: state.entries.len(),
            memory_bytes: state.memory_bytes,
            max_memory_bytes: self.config.max_memory_bytes,
            refreshing: state.refreshing.len(),
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.state.lock();
        assert_eq!(state.lru.len(), state.entries.len(), "every entry has exactly one recency tick");
        let memory: usize = state.entries.values().map(|slot| slot.entry.size()).sum();
        assert_eq!(memory, state.memory_bytes, "tracked memory matches resident entries");
        for (tick, key) in &state.lru {
            assert_eq!(state.entries[key].tick, *tick);
        }
        if let Some(index) = &state.namespaces {
            let indexed: usize = index.values().map(HashSet::len).sum();
            let tagged = state.entries.values().filter(|slot| slot.entry.namespace().is_some()).count();
            assert_eq!(indexed, tagged, "namespace index covers tagged entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_tier::ClockControl;

    use super::*;

    static_assertions::assert_impl_all!(L1Cache: Send, Sync);

    const TTL: Duration = Duration::from_secs(100);

    fn cache(config: L1Config) -> (L1Cache, ClockControl) {
        let control = ClockControl::new();
        let cache = L1Cache::new(config).with_clock(control.to_clock()).with_jitter(Jitter::none());
        (cache, control)
    }

    fn bytes(len: usize) -> Bytes {
        Bytes::from(vec![0_u8; len])
    }

    #[test]
    fn first_version_is_zero_and_overwrite_bumps() {
        let (cache, _) = cache(L1Config::default());
        cache.put("k", bytes(1), TTL, None);
        assert_eq!(cache.version("k"), Some(0));

        cache.put("k", bytes(2), TTL, None);
        assert_eq!(cache.version("k"), Some(1));
        cache.assert_consistent();
    }

    #[test]
    fn expired_entries_are_removed_lazily() {
        let (cache, control) = cache(L1Config::default());
        cache.put("k", bytes(4), Duration::from_secs(10), None);

        control.advance_secs(10);
        assert_eq!(cache.len(), 1, "expiry is not swept proactively");
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
        cache.assert_consistent();
    }

    #[test]
    fn oversized_entry_is_not_admitted_and_drops_old_value() {
        let config = L1Config::default().with_max_memory_bytes(1000).with_max_entry_bytes(50);
        let (cache, _) = cache(config);

        assert!(cache.put("k", bytes(10), TTL, Some("ns")));
        assert!(!cache.put("k", bytes(100), TTL, Some("ns")));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.memory_usage(), 0);
        cache.assert_consistent();
    }

    #[test]
    fn overwrite_moves_namespace() {
        let (cache, _) = cache(L1Config::default());
        cache.put("k", bytes(1), TTL, Some("a"));
        cache.put("k", bytes(1), TTL, Some("b"));

        assert_eq!(cache.invalidate_by_namespace("a"), 0);
        assert_eq!(cache.invalidate_by_namespace("b"), 1);
        cache.assert_consistent();
    }

    #[test]
    fn refresh_commit_replaces_value_and_rearms_expiry() {
        let (cache, control) = cache(L1Config::default());
        cache.put("k", Bytes::from_static(b"old"), TTL, Some("ns"));

        control.advance_secs(60);
        let hit = cache.get_with_swr("k", TTL).unwrap();
        assert!(hit.needs_refresh);

        let now = control.to_clock().instant();
        assert!(cache.complete_refresh("k", hit.version, Bytes::from_static(b"new"), now));
        assert!(!cache.is_refreshing("k"));

        let entry = cache.peek("k").unwrap();
        assert_eq!(entry.value(), &Bytes::from_static(b"new"));
        assert_eq!(entry.cached_at(), now);
        assert_eq!(entry.remaining_ttl(now), TTL);
        assert_eq!(entry.namespace(), Some("ns"));
        assert!(cache.version("k").unwrap() > hit.version);

        // the fresh value is no longer stale
        assert!(!cache.get_with_swr("k", TTL).unwrap().needs_refresh);
        cache.assert_consistent();
    }

    #[test]
    fn overwrite_during_refresh_wins() {
        let (cache, control) = cache(L1Config::default());
        cache.put("k", Bytes::from_static(b"v1"), TTL, None);
        control.advance_secs(60);
        let hit = cache.get_with_swr("k", TTL).unwrap();

        cache.put("k", Bytes::from_static(b"v2"), TTL, None);
        let now = control.to_clock().instant();
        assert!(!cache.complete_refresh("k", hit.version, Bytes::from_static(b"refreshed"), now));
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"v2")));
    }

    #[test]
    fn refresh_of_evicted_key_fails() {
        let config = L1Config::default().with_max_memory_bytes(20).with_max_entry_bytes(20);
        let (cache, control) = cache(config);
        cache.put("a", bytes(9), TTL, None);
        control.advance_secs(60);
        let hit = cache.get_with_swr("a", TTL).unwrap();

        cache.put("b", bytes(9), TTL, None);
        cache.put("c", bytes(9), TTL, None);
        assert_eq!(cache.get("a"), None, "a was least recently used");

        let now = control.to_clock().instant();
        assert!(!cache.complete_refresh("a", hit.version, bytes(9), now));
        assert!(!cache.is_refreshing("a"));
        cache.assert_consistent();
    }

    #[test]
    fn cancel_allows_next_refresh() {
        let (cache, control) = cache(L1Config::default());
        cache.put("k", bytes(1), TTL, None);
        control.advance_secs(60);

        let hit = cache.get_with_swr("k", TTL).unwrap();
        assert!(hit.needs_refresh);
        cache.cancel_refresh("k", hit.version);
        cache.cancel_refresh("k", hit.version);
        assert!(cache.get_with_swr("k", TTL).unwrap().needs_refresh);
    }

    #[test]
    fn superseded_refresh_leaves_newer_mark() {
        let (cache, control) = cache(L1Config::default());
        cache.put("k", bytes(1), TTL, None);
        control.advance_secs(60);
        let first = cache.get_with_swr("k", TTL).unwrap();
        assert!(first.needs_refresh);

        assert!(cache.invalidate_by_key("k"));
        cache.put("k", bytes(2), TTL, None);
        control.advance_secs(60);
        let second = cache.get_with_swr("k", TTL).unwrap();
        assert!(second.needs_refresh);

        let now = control.to_clock().instant();
        assert!(!cache.complete_refresh("k", first.version, bytes(3), now));
        cache.cancel_refresh("k", first.version);
        assert!(cache.is_refreshing("k"));
        assert!(!cache.get_with_swr("k", TTL).unwrap().needs_refresh);

        assert!(cache.complete_refresh("k", second.version, bytes(4), now));
        assert!(!cache.is_refreshing("k"));
        cache.assert_consistent();
    }

    #[test]
    fn swr_disabled_never_refreshes() {
        let (cache, control) = cache(L1Config::default().with_swr(false));
        cache.put("k", bytes(1), TTL, None);
        control.advance_secs(99);
        assert!(!cache.get_with_swr("k", TTL).unwrap().needs_refresh);
    }

    #[test]
    fn jitter_moves_the_threshold() {
        let control = ClockControl::new();
        let early = L1Cache::new(L1Config::default())
            .with_clock(control.to_clock())
            .with_jitter(Jitter::fixed(0.0));
        let late = L1Cache::new(L1Config::default())
            .with_clock(control.to_clock())
            .with_jitter(Jitter::fixed(1.0));
        early.put("k", bytes(1), TTL, None);
        late.put("k", bytes(1), TTL, None);

        // thresholds are 45s and 55s
        control.advance_secs(50);
        assert!(early.get_with_swr("k", TTL).unwrap().needs_refresh);
        assert!(!late.get_with_swr("k", TTL).unwrap().needs_refresh);
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let (cache, control) = cache(L1Config::default());
        cache.put("a", bytes(1), TTL, Some("ns"));
        cache.put("b", bytes(1), TTL, None);
        control.advance_secs(60);
        assert!(cache.get_with_swr("a", TTL).unwrap().needs_refresh);

        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().refreshing, 0);
        assert_eq!(cache.invalidate_by_namespace("ns"), 0);
        cache.assert_consistent();
    }
}
