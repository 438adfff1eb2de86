//! Cross-tier consistency checking and repair.
//!
//! The remote tier and the durable store drift when writes land in one
//! but not the other during an outage. The sync engine diffs the two,
//! re-adds missing entries with their remaining TTL, warms the caches at
//! startup, and runs the whole cycle periodically in the background.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use modelgate_core::TokenHash;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::entry::BlacklistEntry;
use crate::error::BlacklistError;
use crate::local_cache::LocalCache;
use crate::stats::{SyncStatistics, SyncStatsSnapshot};
use crate::store::DurableStore;
use crate::tier::RemoteTier;

/// Consecutive repair failures for one token before escalating to an
/// error-level event.
const REPAIR_ESCALATION_THRESHOLD: u32 = 3;

/// Expiry skew between tiers tolerated before counting a conflict.
const CONFLICT_SKEW_SECS: i64 = 1;

/// Outcome of a consistency check between the remote tier and the
/// durable store.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyCheckResult {
    pub consistent: bool,
    pub primary_count: u64,
    pub durable_count: u64,
    /// Unexpired durable entries with no live primary key.
    pub missing_in_primary: Vec<TokenHash>,
    /// Live primary keys with no durable row.
    pub missing_in_durable: Vec<TokenHash>,
    /// Tokens present in both tiers whose expiries disagree.
    pub conflict_count: u64,
}

impl std::fmt::Display for ConsistencyCheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "consistent={} primary={} durable={} missing_in_primary={} missing_in_durable={} conflicts={}",
            self.consistent,
            self.primary_count,
            self.durable_count,
            self.missing_in_primary.len(),
            self.missing_in_durable.len(),
            self.conflict_count,
        )
    }
}

/// Outcome of a repair, recovery, or full sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub message: String,
    pub duration_ms: u64,
}

impl SyncResult {
    fn skipped(message: impl Into<String>) -> Self {
        Self {
            success: false,
            processed: 0,
            succeeded: 0,
            failed: 0,
            message: message.into(),
            duration_ms: 0,
        }
    }
}

/// Diffs and repairs the remote tier against the durable store.
pub struct SyncEngine {
    tier: Arc<RemoteTier>,
    durable: Arc<dyn DurableStore>,
    local: Arc<LocalCache>,
    ready: Arc<AtomicBool>,
    stats: SyncStatistics,
    /// Held for the duration of a sync pass so passes never overlap.
    sync_lock: AsyncMutex<()>,
    repair_failures: Mutex<HashMap<TokenHash, u32>>,
}

impl SyncEngine {
    /// `ready` is the engine's readiness flag; startup recovery clears it
    /// while the caches warm.
    #[must_use]
    pub fn new(
        tier: Arc<RemoteTier>,
        durable: Arc<dyn DurableStore>,
        local: Arc<LocalCache>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tier,
            durable,
            local,
            ready,
            stats: SyncStatistics::new(),
            sync_lock: AsyncMutex::new(()),
            repair_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Diff the remote tier against the durable store.
    pub async fn check_consistency(&self) -> Result<ConsistencyCheckResult, BlacklistError> {
        let now = Utc::now();

        let primary_tokens = self.tier.primary_tokens().await?;
        let durable_entries = self.durable.active_entries(now).await?;

        let durable_by_hash: HashMap<&TokenHash, &BlacklistEntry> = durable_entries
            .iter()
            .map(|e| (&e.token_hash, e))
            .collect();

        let missing_in_durable: Vec<TokenHash> = primary_tokens
            .iter()
            .filter(|t| !durable_by_hash.contains_key(t))
            .cloned()
            .collect();

        let mut missing_in_primary = Vec::new();
        let mut conflict_count = 0;
        for entry in &durable_entries {
            match self.tier.get_primary(&entry.token_hash).await? {
                None => missing_in_primary.push(entry.token_hash.clone()),
                Some(remote) => {
                    let skew = (remote.expires_at - entry.expires_at).num_seconds().abs();
                    if skew > CONFLICT_SKEW_SECS {
                        conflict_count += 1;
                    }
                }
            }
        }

        let result = ConsistencyCheckResult {
            consistent: missing_in_primary.is_empty()
                && missing_in_durable.is_empty()
                && conflict_count == 0,
            primary_count: primary_tokens.len() as u64,
            durable_count: durable_entries.len() as u64,
            missing_in_primary,
            missing_in_durable,
            conflict_count,
        };

        if result.consistent {
            info!(%result, "consistency check passed");
        } else {
            warn!(%result, "consistency check found drift");
        }
        Ok(result)
    }

    /// Repair the drift a consistency check found: durable entries
    /// missing remotely are re-added with their remaining TTL, and live
    /// remote entries missing durably are written back.
    pub async fn repair_inconsistency(&self, check: &ConsistencyCheckResult) -> SyncResult {
        let started = Instant::now();
        let mut succeeded = 0u64;
        let mut failed = 0u64;

        for token_hash in &check.missing_in_primary {
            match self.restore_to_remote(token_hash).await {
                Ok(true) => {
                    succeeded += 1;
                    self.clear_repair_failure(token_hash);
                }
                Ok(false) => {
                    // Expired or deleted since the check; nothing to do.
                    self.clear_repair_failure(token_hash);
                }
                Err(e) => {
                    failed += 1;
                    self.note_repair_failure(token_hash, &e);
                }
            }
        }

        for token_hash in &check.missing_in_durable {
            match self.restore_to_durable(token_hash).await {
                Ok(true) => {
                    succeeded += 1;
                    self.clear_repair_failure(token_hash);
                }
                Ok(false) => {
                    self.clear_repair_failure(token_hash);
                }
                Err(e) => {
                    failed += 1;
                    self.note_repair_failure(token_hash, &e);
                }
            }
        }

        let processed = (check.missing_in_primary.len() + check.missing_in_durable.len()) as u64;
        SyncResult {
            success: failed == 0,
            processed,
            succeeded,
            failed,
            message: format!("repaired {succeeded} of {processed} drifted entries"),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Warm the remote tier and the local cache from the durable store
    /// after a restart. The readiness flag is cleared for the duration so
    /// callers can gate traffic until the caches hold the full set.
    pub async fn perform_startup_recovery(&self) -> Result<SyncResult, BlacklistError> {
        let started = Instant::now();
        self.ready.store(false, Ordering::SeqCst);

        let entries = match self.durable.active_entries(Utc::now()).await {
            Ok(entries) => entries,
            Err(e) => {
                // Cold caches are still serviceable; do not wedge startup.
                self.ready.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut succeeded = 0u64;
        let mut failed = 0u64;
        for entry in &entries {
            self.local.put(entry.clone());
            match self.add_remote_with_remaining_ttl(entry).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    failed += 1;
                    warn!(token_hash = %entry.token_hash, error = %e, "recovery write failed");
                }
            }
        }

        self.ready.store(true, Ordering::SeqCst);
        let result = SyncResult {
            success: failed == 0,
            processed: entries.len() as u64,
            succeeded,
            failed,
            message: format!("recovered {succeeded} of {} durable entries", entries.len()),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            processed = result.processed,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "startup recovery completed"
        );
        Ok(result)
    }

    /// One full sync pass: check, then repair whatever the check found.
    /// At most one pass runs at a time; a pass requested while another is
    /// in flight is skipped, not queued.
    pub async fn perform_bidirectional_sync(&self) -> SyncResult {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            return SyncResult::skipped("sync already in progress");
        };

        let started = Instant::now();
        let result = match self.check_consistency().await {
            Ok(check) if check.consistent => SyncResult {
                success: true,
                processed: 0,
                succeeded: 0,
                failed: 0,
                message: "tiers consistent; nothing to repair".to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Ok(check) => self.repair_inconsistency(&check).await,
            Err(e) => SyncResult {
                success: false,
                processed: 0,
                succeeded: 0,
                failed: 0,
                message: format!("consistency check failed: {e}"),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        };

        self.stats
            .record_operation(result.success, Utc::now().timestamp_millis());
        result
    }

    /// Sync counters.
    #[must_use]
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    async fn restore_to_remote(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        let Some(entry) = self.durable.find_entry(token_hash).await? else {
            return Ok(false);
        };
        if entry.is_expired() {
            return Ok(false);
        }
        self.add_remote_with_remaining_ttl(&entry).await?;
        Ok(true)
    }

    async fn restore_to_durable(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        let Some(entry) = self.tier.get_primary(token_hash).await? else {
            return Ok(false);
        };
        if entry.is_expired() {
            return Ok(false);
        }
        self.durable.upsert_entry(&entry).await?;
        Ok(true)
    }

    async fn add_remote_with_remaining_ttl(
        &self,
        entry: &BlacklistEntry,
    ) -> Result<(), BlacklistError> {
        let Some(remaining) = entry.remaining_ttl() else {
            return Ok(());
        };
        self.tier.add(entry, remaining).await
    }

    fn note_repair_failure(&self, token_hash: &TokenHash, e: &BlacklistError) {
        let mut failures = self
            .repair_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(token_hash.clone()).or_insert(0);
        *count += 1;
        if *count >= REPAIR_ESCALATION_THRESHOLD {
            error!(
                token_hash = %token_hash,
                attempts = *count,
                error = %e,
                "repair keeps failing for token"
            );
        } else {
            warn!(token_hash = %token_hash, attempts = *count, error = %e, "repair failed");
        }
    }

    fn clear_repair_failure(&self, token_hash: &TokenHash) {
        self.repair_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token_hash);
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("remote", &self.tier.store_type())
            .field("durable", &self.durable.store_type())
            .finish_non_exhaustive()
    }
}

/// Runs [`SyncEngine::perform_bidirectional_sync`] on an interval.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    interval: std::time::Duration,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, interval: std::time::Duration) -> Self {
        Self {
            engine,
            interval,
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    /// Spawn the periodic sync task. Idempotent.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("sync scheduler already running");
                return;
            }
            *running = true;
        }

        let engine = Arc::clone(&self.engine);
        let running = Arc::clone(&self.running);
        let interval = self.interval;

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "sync scheduler started");
            loop {
                tokio::time::sleep(interval).await;
                if !*running.read().await {
                    break;
                }
                let result = engine.perform_bidirectional_sync().await;
                if !result.success {
                    warn!(message = %result.message, "background sync pass failed");
                }
            }
            info!("sync scheduler stopped");
        });
    }

    /// Signal the background task to stop after its current pass.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}
