//! In-process blacklist cache.
//!
//! The fast path for `is_blacklisted` and the fallback tier when the
//! remote store is unreachable. All operations are synchronous and safe
//! for concurrent use from many request-handling tasks; remote I/O never
//! happens here.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use modelgate_core::TokenHash;

use crate::entry::BlacklistEntry;
use crate::stats::CacheStatistics;

/// Default maximum number of cached entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Bounded, TTL-aware in-process map of blacklist entries.
///
/// Expiry is lazy: a read of an expired entry removes it and reports a
/// miss, independent of the background sweep. When the entry count
/// exceeds the bound, expired entries are evicted first, then the entries
/// with the soonest expiry. Revocations are time-bounded by nature, so
/// soonest-to-expire is the lowest-value entry to drop; LRU would evict
/// long-lived revocations that still matter.
#[derive(Debug)]
pub struct LocalCache {
    entries: RwLock<HashMap<TokenHash, BlacklistEntry>>,
    max_entries: usize,
    stats: Arc<CacheStatistics>,
}

impl LocalCache {
    /// Create a cache bounded at [`DEFAULT_MAX_ENTRIES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache with an explicit entry bound.
    #[must_use]
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            stats: Arc::new(CacheStatistics::new()),
        }
    }

    /// Insert or overwrite an entry. The entry's `expires_at` carries its
    /// TTL. Enforces the entry bound after inserting.
    pub fn put(&self, entry: BlacklistEntry) {
        let mut entries = self.write_entries();
        entries.insert(entry.token_hash.clone(), entry);
        self.stats.record_write();
        self.enforce_bound(&mut entries);
    }

    /// Look up an entry. Returns `None` when absent or expired; an
    /// expired entry is removed on the spot and counted as an eviction.
    pub fn get(&self, token_hash: &TokenHash) -> Option<BlacklistEntry> {
        let now = Utc::now();
        {
            let entries = self.read_entries();
            match entries.get(token_hash) {
                Some(entry) if !entry.is_expired_at(now) => {
                    self.stats.record_hit();
                    return Some(entry.clone());
                }
                Some(_) => {}
                None => {
                    self.stats.record_miss();
                    return None;
                }
            }
        }

        // Lazy expiry: drop the stale entry under the write lock.
        let mut entries = self.write_entries();
        if entries
            .get(token_hash)
            .is_some_and(|e| e.is_expired_at(now))
        {
            entries.remove(token_hash);
            self.stats.record_evictions(1);
        }
        self.stats.record_miss();
        None
    }

    /// True if an unexpired entry exists.
    pub fn contains(&self, token_hash: &TokenHash) -> bool {
        self.get(token_hash).is_some()
    }

    /// Unconditional delete. No error if absent.
    pub fn remove(&self, token_hash: &TokenHash) -> bool {
        let mut entries = self.write_entries();
        entries.remove(token_hash).is_some()
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.record_evictions(removed as u64);
        }
        removed
    }

    /// Count entries expiring before `threshold`.
    pub fn expiring_before(&self, threshold: DateTime<Utc>) -> usize {
        let entries = self.read_entries();
        entries
            .values()
            .filter(|e| e.expires_at < threshold)
            .count()
    }

    /// Snapshot of all unexpired entries, for warm-up and reconciliation.
    pub fn entries(&self) -> Vec<BlacklistEntry> {
        let now = Utc::now();
        let entries = self.read_entries();
        entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Current entry count, including not-yet-swept expired entries.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// The configured entry bound.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// The cache's counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    /// Evict down to the bound: expired entries first, then soonest
    /// expiry. Caller holds the write lock.
    fn enforce_bound(&self, entries: &mut HashMap<TokenHash, BlacklistEntry>) {
        if entries.len() <= self.max_entries {
            return;
        }

        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let mut evicted = (before - entries.len()) as u64;

        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            let mut by_expiry: Vec<(TokenHash, DateTime<Utc>)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, expires_at)| *expires_at);
            for (token_hash, _) in by_expiry.into_iter().take(overflow) {
                entries.remove(&token_hash);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.record_evictions(evicted);
        }
    }

    // A poisoned lock only means another thread panicked mid-operation;
    // the map itself is still coherent for our usage, so recover rather
    // than wedging the auth path.
    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<TokenHash, BlacklistEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<TokenHash, BlacklistEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}
