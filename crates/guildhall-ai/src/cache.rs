//! Time-bounded memoization from situation fingerprint to decision.
//!
//! Entries expire after a TTL measured in ticks. Expiry is checked lazily on
//! [`DecisionCache::get`] and eagerly by [`DecisionCache::sweep`]. When the
//! cache is full the least recently used entry is evicted.
//!
//! The cache stores decisions exactly as computed. Re-targeting a cached
//! decision at a new situation is the caller's job (see
//! [`DecisionAdapter`](crate::adapt::DecisionAdapter)).

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Serialize;

use guildhall_types::{Decision, Fingerprint};

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Entries dropped to make room for new ones.
    pub evictions: u64,
    /// Entries currently stored.
    pub len: usize,
}

#[derive(Debug)]
struct Entry {
    decision: Decision,
    expires_at: u64,
    stamp: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Fingerprint, Entry>,
    /// Recency index: stamp -> fingerprint. Lowest stamp is least recent.
    recency: BTreeMap<u64, Fingerprint>,
    next_stamp: u64,
    stats: CacheStats,
}

impl Inner {
    fn touch(&mut self, fingerprint: Fingerprint) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.wrapping_add(1);
        self.recency.insert(stamp, fingerprint);
        stamp
    }

    fn remove(&mut self, fingerprint: Fingerprint) -> Option<Entry> {
        let entry = self.entries.remove(&fingerprint)?;
        self.recency.remove(&entry.stamp);
        Some(entry)
    }
}

/// A capacity-bounded, TTL-bounded decision cache.
///
/// Internally synchronized; share it behind an `Arc`.
#[derive(Debug)]
pub struct DecisionCache {
    capacity: usize,
    default_ttl: u64,
    inner: Mutex<Inner>,
}

impl DecisionCache {
    /// Create a cache holding at most `capacity` entries, with `default_ttl`
    /// ticks used by [`DecisionCache::put_default`].
    pub fn new(capacity: usize, default_ttl: u64) -> Self {
        Self {
            capacity,
            default_ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// TTL applied by [`DecisionCache::put_default`].
    pub const fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Look up a live entry.
    ///
    /// An entry stored at tick `t` with TTL `n` is live for ticks
    /// `t..t + n`. An expired entry is removed and counts as a miss.
    pub fn get(&self, fingerprint: Fingerprint, now_tick: u64) -> Option<Decision> {
        let mut inner = self.inner.lock();
        let Some(expires_at) = inner.entries.get(&fingerprint).map(|e| e.expires_at) else {
            inner.stats.misses = inner.stats.misses.saturating_add(1);
            return None;
        };

        if now_tick >= expires_at {
            inner.remove(fingerprint);
            inner.stats.expirations = inner.stats.expirations.saturating_add(1);
            inner.stats.misses = inner.stats.misses.saturating_add(1);
            return None;
        }

        let stamp = inner.touch(fingerprint);
        let entry = inner.entries.get_mut(&fingerprint)?;
        let old = std::mem::replace(&mut entry.stamp, stamp);
        let decision = entry.decision.clone();
        inner.recency.remove(&old);
        inner.stats.hits = inner.stats.hits.saturating_add(1);
        Some(decision)
    }

    /// Store `decision` for `ttl_ticks` ticks starting at `now_tick`.
    ///
    /// A zero TTL or zero capacity stores nothing.
    pub fn put(&self, fingerprint: Fingerprint, decision: Decision, ttl_ticks: u64, now_tick: u64) {
        if ttl_ticks == 0 || self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.remove(fingerprint);

        while inner.entries.len() >= self.capacity {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.stats.evictions = inner.stats.evictions.saturating_add(1);
        }

        let stamp = inner.touch(fingerprint);
        inner.entries.insert(
            fingerprint,
            Entry {
                decision,
                expires_at: now_tick.saturating_add(ttl_ticks),
                stamp,
            },
        );
    }

    /// Store `decision` with the default TTL.
    pub fn put_default(&self, fingerprint: Fingerprint, decision: Decision, now_tick: u64) {
        self.put(fingerprint, decision, self.default_ttl, now_tick);
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, fingerprint: Fingerprint) -> bool {
        self.inner.lock().remove(fingerprint).is_some()
    }

    /// Remove every entry expired at `now_tick`. Returns how many.
    pub fn sweep(&self, now_tick: u64) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, e)| now_tick >= e.expires_at)
            .map(|(fp, _)| *fp)
            .collect();
        for fingerprint in &expired {
            inner.remove(*fingerprint);
        }
        let removed = expired.len();
        inner.stats.expirations = inner
            .stats
            .expirations
            .saturating_add(u64::try_from(removed).unwrap_or(u64::MAX));
        removed
    }

    /// Drop everything. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Number of stored entries, live or not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            len: inner.entries.len(),
            ..inner.stats
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use guildhall_types::{ActionKind, DecisionOrigin};

    use super::*;

    fn decision(action: ActionKind) -> Decision {
        Decision::new(action, 0.8, 100, DecisionOrigin::Model)
    }

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = DecisionCache::new(8, 5);
        let fp = Fingerprint(1);
        cache.put_default(fp, decision(ActionKind::Rest), 10);
        assert_eq!(cache.get(fp, 14).unwrap().action, ActionKind::Rest);
        assert!(cache.get(fp, 15).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.len, 0);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let cache = DecisionCache::new(2, 10);
        cache.put_default(Fingerprint(1), decision(ActionKind::Rest), 0);
        cache.put_default(Fingerprint(2), decision(ActionKind::Patrol), 0);
        // Touch 1 so that 2 becomes the eviction candidate.
        assert!(cache.get(Fingerprint(1), 1).is_some());
        cache.put_default(Fingerprint(3), decision(ActionKind::Defend), 1);

        assert!(cache.get(Fingerprint(2), 2).is_none());
        assert!(cache.get(Fingerprint(1), 2).is_some());
        assert!(cache.get(Fingerprint(3), 2).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = DecisionCache::new(8, 10);
        cache.put(Fingerprint(1), decision(ActionKind::Rest), 2, 0);
        cache.put(Fingerprint(2), decision(ActionKind::Rest), 20, 0);
        assert_eq!(cache.sweep(5), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn replacing_an_entry_does_not_evict() {
        let cache = DecisionCache::new(1, 10);
        cache.put_default(Fingerprint(1), decision(ActionKind::Rest), 0);
        cache.put_default(Fingerprint(1), decision(ActionKind::Flee), 0);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(Fingerprint(1), 0).unwrap().action, ActionKind::Flee);
    }

    #[test]
    fn zero_ttl_or_capacity_stores_nothing() {
        let cache = DecisionCache::new(4, 0);
        cache.put_default(Fingerprint(1), decision(ActionKind::Rest), 0);
        assert!(cache.is_empty());
        let cache = DecisionCache::new(0, 5);
        cache.put_default(Fingerprint(1), decision(ActionKind::Rest), 0);
        assert!(cache.is_empty());
    }
}
