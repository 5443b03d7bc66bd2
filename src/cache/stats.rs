//! Cache Statistics
//!
//! Lock-free per-tier counters and the plain snapshot structures handed to
//! dashboards. Latency is tracked as an exponential moving average so the
//! hot path never allocates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Per-tier counters. All operations are relaxed atomics; snapshots are
/// point-in-time and not mutually consistent across counters.
#[derive(Debug, Default)]
pub struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    expired: AtomicU64,
    read_latency_us: AtomicU64,
}

impl TierCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Fold a read latency sample into the EMA.
    pub fn record_read_latency(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = self.read_latency_us.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if self
                .read_latency_us
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.expired.store(0, Ordering::Relaxed);
        self.read_latency_us.store(0, Ordering::Relaxed);
    }

    /// Point-in-time snapshot combined with the tier's current occupancy.
    pub fn snapshot(&self, entries: u64, size_bytes: u64, top_keys: Vec<HotKey>) -> TierStats {
        let hits = self.hits();
        let misses = self.misses();
        let total = hits + misses;
        TierStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            entries,
            size_bytes,
            avg_read_latency_us: self.read_latency_us.load(Ordering::Relaxed),
            top_keys,
        }
    }
}

/// One of the most-accessed keys in a tier.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HotKey {
    pub key: String,
    pub access_count: u32,
}

/// Per-tier statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub expired: u64,
    pub entries: u64,
    pub size_bytes: u64,
    pub avg_read_latency_us: u64,
    pub top_keys: Vec<HotKey>,
}

/// Aggregate metrics across all tiers.
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub overall_hit_rate: f64,
    pub total_entries: u64,
    pub total_size_bytes: u64,
    pub total_evictions: u64,
    pub total_invalidations: u64,
    pub promotions: u64,
    pub per_tier: Vec<(String, TierStats)>,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let counters = TierCounters::new();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();

        assert_eq!(counters.hits(), 2);
        assert_eq!(counters.misses(), 1);
        assert!((counters.hit_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_hit_rate_no_traffic() {
        let counters = TierCounters::new();
        assert_eq!(counters.hit_rate(), 0.0);
    }

    #[test]
    fn test_latency_ema_smoothing() {
        let counters = TierCounters::new();

        counters.record_read_latency(Duration::from_micros(100));
        let snap = counters.snapshot(0, 0, Vec::new());
        assert_eq!(snap.avg_read_latency_us, 100);

        counters.record_read_latency(Duration::from_micros(200));
        let snap = counters.snapshot(0, 0, Vec::new());
        assert!(snap.avg_read_latency_us > 100 && snap.avg_read_latency_us < 200);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let counters = TierCounters::new();
        counters.record_hit();
        counters.record_set();
        counters.record_eviction(3);
        counters.record_invalidation(2);

        let snap = counters.snapshot(
            5,
            1024,
            vec![HotKey {
                key: "hot".into(),
                access_count: 9,
            }],
        );
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.sets, 1);
        assert_eq!(snap.evictions, 3);
        assert_eq!(snap.invalidations, 2);
        assert_eq!(snap.entries, 5);
        assert_eq!(snap.size_bytes, 1024);
        assert_eq!(snap.top_keys[0].key, "hot");

        counters.reset();
        assert_eq!(counters.hits(), 0);
        assert_eq!(counters.evictions(), 0);
    }
}
