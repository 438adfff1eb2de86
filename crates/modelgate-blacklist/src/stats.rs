//! Statistics counters for the cache tiers and the sync engine.
//!
//! Counters are monotonic and updated with relaxed atomics; they are owned
//! by the component that increments them and injected where needed rather
//! than reached through global state. Nothing resets them except an
//! explicit operator call.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonic counters owned by a single cache tier.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

impl CacheStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Reset all counters to zero. Operator action only.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of a tier's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub errors: u64,
    /// hits / (hits + misses), 0.0 when no lookups have happened.
    pub hit_rate: f64,
}

/// Counters owned by the sync engine.
#[derive(Debug, Default)]
pub struct SyncStatistics {
    total_operations: AtomicU64,
    successful_operations: AtomicU64,
    failed_operations: AtomicU64,
    /// Unix millis of the last completed sync, 0 if never.
    last_sync_ms: AtomicI64,
}

impl SyncStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_operation(&self, success: bool, completed_at_ms: i64) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_operations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_operations.fetch_add(1, Ordering::Relaxed);
        }
        self.last_sync_ms.store(completed_at_ms, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        let total = self.total_operations.load(Ordering::Relaxed);
        let successful = self.successful_operations.load(Ordering::Relaxed);
        SyncStatsSnapshot {
            total_operations: total,
            successful_operations: successful,
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
            last_sync_ms: self.last_sync_ms.load(Ordering::Relaxed),
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
        }
    }
}

/// Point-in-time view of sync counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStatsSnapshot {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub last_sync_ms: i64,
    pub success_rate: f64,
}
