// =============================================================================
// cache.rs — THE FIVE-MINUTE MEMORY PALACE
// =============================================================================
//
// Every successful lookup costs us a full headless-browser session against
// a court website that measures page loads in geological time. So we
// remember answers for a while (300 seconds by default) and hand the same
// JSON back to anyone who asks twice.
//
// Design decisions, stated plainly so nobody "fixes" them later:
//
// 1. Stale entries are NOT evicted. `get` simply pretends they don't exist
//    and the next successful lookup overwrites them in place. The map grows
//    with the set of distinct documents ever queried — bounded in practice
//    by how many CPFs humanity is willing to type into this thing, and
//    exposed as a row count on /metrics so operators can watch it.
//
// 2. No per-key locking. Writes are last-write-wins over a whole-map
//    RwLock. The single-slot session gate already serializes the expensive
//    computations; giving the cache its own coordination layer would be
//    armor on a submarine.
//
// 3. Thread-safe anyway, with parking_lot, because request handlers race
//    each other on reads and data races are not a feature we ship.
// =============================================================================

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::LookupResult;

/// One remembered answer: when we computed it and what we computed.
struct CacheEntry {
    stored_at: Instant,
    payload: LookupResult,
}

/// Statistics about cache traffic. All counters are atomic because we're
/// allergic to mutexes where a fetch_add will do.
pub struct CacheStats {
    /// `get` calls that returned a fresh entry
    pub hits: portable_atomic::AtomicU64,
    /// `get` calls that found nothing at all
    pub misses: portable_atomic::AtomicU64,
    /// `get` calls that found a row but it had aged out — reported to the
    /// caller as a miss, kept separate here because the distinction is the
    /// difference between "nobody asked before" and "the TTL is too short"
    pub stale_misses: portable_atomic::AtomicU64,
    /// `put` calls (first writes and overwrites alike)
    pub writes: portable_atomic::AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: portable_atomic::AtomicU64::new(0),
            misses: portable_atomic::AtomicU64::new(0),
            stale_misses: portable_atomic::AtomicU64::new(0),
            writes: portable_atomic::AtomicU64::new(0),
        }
    }
}

/// A serializable snapshot of cache statistics for the metrics endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stale_misses: u64,
    pub writes: u64,
    pub rows: usize,
}

/// The TTL'd lookup cache. Constructed once at startup, owned by the engine,
/// passed by reference to anything that needs it — no module-level globals,
/// no hidden state, fully testable in isolation.
pub struct LookupCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    pub stats: CacheStats,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            stats: CacheStats::new(),
        }
    }

    /// Fetch a fresh entry for `key`, or None if absent or aged out.
    /// An aged-out row stays in the map untouched; it reads as absent and
    /// will be overwritten by the next successful lookup for the key.
    pub fn get(&self, key: &str) -> Option<LookupResult> {
        use portable_atomic::Ordering;

        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Cache hit — the court will not be bothered");
                Some(entry.payload.clone())
            }
            Some(_) => {
                self.stats.stale_misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Cache row present but stale — treating as miss");
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store (or overwrite) the entry for `key`. Last write wins; there is
    /// nothing to merge because a LookupResult is a complete answer.
    pub fn put(&self, key: &str, payload: LookupResult) {
        use portable_atomic::Ordering;

        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            CacheEntry {
                stored_at: Instant::now(),
                payload,
            },
        );
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Cache write — answer remembered");
    }

    /// Current number of rows, fresh and stale alike. The operational
    /// growth curve lives here.
    pub fn rows(&self) -> usize {
        self.entries.read().len()
    }

    /// Snapshot for the metrics endpoint.
    pub fn snapshot(&self) -> CacheSnapshot {
        use portable_atomic::Ordering;
        CacheSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            stale_misses: self.stats.stale_misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            rows: self.rows(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocKind, Identifier};

    fn sample_result() -> LookupResult {
        LookupResult::new(&Identifier {
            kind: DocKind::Cpf,
            digits: "12345678901".to_string(),
        })
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let cache = LookupCache::new(Duration::from_secs(300));
        let result = sample_result();
        let id = result.id.clone();
        cache.put("cpf:12345678901", result);
        let fetched = cache.get("cpf:12345678901").expect("fresh entry");
        assert_eq!(fetched.id, id);
    }

    #[test]
    fn test_expired_entry_reads_as_absent_but_stays_in_map() {
        let cache = LookupCache::new(Duration::from_millis(10));
        cache.put("cpf:12345678901", sample_result());
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("cpf:12345678901").is_none());
        // The row was not evicted — staleness is a read-side fiction.
        assert_eq!(cache.rows(), 1);
    }

    #[test]
    fn test_missing_key_is_a_miss() {
        let cache = LookupCache::new(Duration::from_secs(300));
        assert!(cache.get("cpf:00000000000").is_none());
        use portable_atomic::Ordering;
        assert_eq!(cache.stats.misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_overwrite_wins_over_stale_row() {
        let cache = LookupCache::new(Duration::from_millis(10));
        cache.put("cpf:12345678901", sample_result());
        std::thread::sleep(Duration::from_millis(25));

        let newer = sample_result();
        let newer_id = newer.id.clone();
        cache.put("cpf:12345678901", newer);

        let fetched = cache.get("cpf:12345678901").expect("overwritten entry");
        assert_eq!(fetched.id, newer_id);
        assert_eq!(cache.rows(), 1);
    }

    #[test]
    fn test_snapshot_counts_traffic() {
        let cache = LookupCache::new(Duration::from_secs(300));
        cache.put("cpf:12345678901", sample_result());
        let _ = cache.get("cpf:12345678901");
        let _ = cache.get("cpf:99999999999");
        let snap = cache.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.rows, 1);
    }
}
