// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - Because if you can't measure it, it didn't happen
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters for everything. Lock-free because we're THAT paranoid
// about contention on a service whose throughput is gated to one browser
// at a time. The /metrics route serializes a snapshot of all of this so
// an operator can tell at a glance whether the engine is humming, queueing,
// or quietly timing out against the tribunal.

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::Instant;

/// The metrics snapshot - what gets serialized to JSON
#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub health_requests: u64,
    pub invalid_documents: u64,
    pub cache_hits: u64,
    pub cache_recheck_hits: u64,
    pub lookups_started: u64,
    pub lookups_succeeded: u64,
    pub lookups_timed_out: u64,
    pub lookups_failed: u64,
    pub cases_scraped: u64,
    pub popup_failures: u64,
    pub uptime_seconds: u64,
    pub status: String,
}

/// Thread-safe atomic metrics collector.
/// Every counter is atomic because mutexes are for the weak.
pub struct MetricsCollector {
    requests_total: AtomicU64,
    health_requests: AtomicU64,
    invalid_documents: AtomicU64,
    cache_hits: AtomicU64,
    /// Cache hits scored AFTER winning the session slot — i.e. requests
    /// that queued behind someone computing the same answer and got to
    /// ride home free. The closest thing this engine has to coalescing.
    cache_recheck_hits: AtomicU64,
    lookups_started: AtomicU64,
    lookups_succeeded: AtomicU64,
    lookups_timed_out: AtomicU64,
    lookups_failed: AtomicU64,
    cases_scraped: AtomicU64,
    popup_failures: AtomicU64,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            health_requests: AtomicU64::new(0),
            invalid_documents: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_recheck_hits: AtomicU64::new(0),
            lookups_started: AtomicU64::new(0),
            lookups_succeeded: AtomicU64::new(0),
            lookups_timed_out: AtomicU64::new(0),
            lookups_failed: AtomicU64::new(0),
            cases_scraped: AtomicU64::new(0),
            popup_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_health(&self) {
        self.health_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_invalid_documents(&self) {
        self.invalid_documents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_recheck_hits(&self) {
        self.cache_recheck_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lookups_started(&self) {
        self.lookups_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lookups_succeeded(&self) {
        self.lookups_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lookups_timed_out(&self) {
        self.lookups_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lookups_failed(&self) {
        self.lookups_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cases_scraped(&self, n: u64) {
        self.cases_scraped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_popup_failures(&self) {
        self.popup_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all metrics (lock-free reads)
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            health_requests: self.health_requests.load(Ordering::Relaxed),
            invalid_documents: self.invalid_documents.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_recheck_hits: self.cache_recheck_hits.load(Ordering::Relaxed),
            lookups_started: self.lookups_started.load(Ordering::Relaxed),
            lookups_succeeded: self.lookups_succeeded.load(Ordering::Relaxed),
            lookups_timed_out: self.lookups_timed_out.load(Ordering::Relaxed),
            lookups_failed: self.lookups_failed.load(Ordering::Relaxed),
            cases_scraped: self.cases_scraped.load(Ordering::Relaxed),
            popup_failures: self.popup_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            status: "operational".to_string(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = MetricsCollector::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 0);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.lookups_started, 0);
        assert_eq!(snap.status, "operational");
    }

    #[test]
    fn test_increments_show_in_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.increment_requests();
        metrics.increment_requests();
        metrics.increment_cache_hits();
        metrics.add_cases_scraped(3);
        metrics.increment_popup_failures();
        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cases_scraped, 3);
        assert_eq!(snap.popup_failures, 1);
    }
}
