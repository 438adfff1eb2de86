//! Periodic cleanup of physically expired state.
//!
//! Correctness never depends on this running: every read path already
//! treats expired entries as absent. The sweep exists to reclaim memory
//! and storage, covering the local cache, the remote expiry index
//! (today's and yesterday's buckets), the durable blacklist table, and
//! stale-`ACTIVE` lifecycle records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use tracing::{info, warn};

use crate::lifecycle::TokenLifecycleManager;
use crate::local_cache::LocalCache;
use crate::store::DurableStore;
use crate::tier::RemoteTier;

/// Runs a cleanup pass on a fixed interval.
#[derive(Clone)]
pub struct CleanupScheduler {
    local: Arc<LocalCache>,
    tier: Arc<RemoteTier>,
    durable: Arc<dyn DurableStore>,
    lifecycle: Option<Arc<TokenLifecycleManager>>,
    interval: Duration,
    running: Arc<tokio::sync::RwLock<bool>>,
    total_cleaned: Arc<AtomicU64>,
}

impl CleanupScheduler {
    #[must_use]
    pub fn new(
        local: Arc<LocalCache>,
        tier: Arc<RemoteTier>,
        durable: Arc<dyn DurableStore>,
        interval: Duration,
    ) -> Self {
        Self {
            local,
            tier,
            durable,
            lifecycle: None,
            interval,
            running: Arc::new(tokio::sync::RwLock::new(false)),
            total_cleaned: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Also transition stale lifecycle records during each pass.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<TokenLifecycleManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Spawn the periodic cleanup task. Idempotent.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("cleanup scheduler already running");
                return;
            }
            *running = true;
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            info!(
                interval_secs = scheduler.interval.as_secs(),
                "cleanup scheduler started"
            );
            loop {
                tokio::time::sleep(scheduler.interval).await;
                if !*scheduler.running.read().await {
                    break;
                }
                scheduler.run_cleanup_pass().await;
            }
            info!("cleanup scheduler stopped");
        });
    }

    /// Signal the background task to stop after its current pass.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// One sweep over every tier. Each component is swept independently;
    /// one failing does not stop the others. Returns items cleaned.
    pub async fn run_cleanup_pass(&self) -> u64 {
        let mut cleaned = self.local.sweep_expired() as u64;

        let today = Utc::now().date_naive();
        let mut buckets = vec![today];
        if let Some(yesterday) = today.checked_sub_days(Days::new(1)) {
            buckets.push(yesterday);
        }
        cleaned += self.tier.sweep_buckets(&buckets).await as u64;

        match self.durable.delete_expired_entries(Utc::now()).await {
            Ok(removed) => cleaned += removed,
            Err(e) => warn!(error = %e, "durable expiry cleanup failed"),
        }

        if let Some(lifecycle) = &self.lifecycle {
            match lifecycle.update_expired_tokens().await {
                Ok(transitioned) => cleaned += transitioned,
                Err(e) => warn!(error = %e, "lifecycle expiry pass failed"),
            }
        }

        self.total_cleaned.fetch_add(cleaned, Ordering::Relaxed);
        if cleaned > 0 {
            info!(cleaned, "cleanup pass finished");
        }
        cleaned
    }

    /// Items cleaned since startup.
    #[must_use]
    pub fn total_cleaned(&self) -> u64 {
        self.total_cleaned.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("interval", &self.interval)
            .field("total_cleaned", &self.total_cleaned())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use modelgate_core::TokenHash;

    use crate::entry::BlacklistEntry;
    use crate::store::memory::{MemoryDurableStore, MemoryRemoteStore};
    use crate::store::RemoteStore;

    fn hash(s: &str) -> TokenHash {
        TokenHash::new(s).unwrap()
    }

    fn entry(id: &str, ttl_secs: u64) -> BlacklistEntry {
        BlacklistEntry::new(hash(id), Duration::from_secs(ttl_secs), None, None)
    }

    fn expired_entry(id: &str) -> BlacklistEntry {
        let mut e = entry(id, 3600);
        e.expires_at = Utc::now() - chrono::Duration::seconds(1);
        e
    }

    fn setup() -> (
        CleanupScheduler,
        Arc<LocalCache>,
        Arc<MemoryRemoteStore>,
        Arc<MemoryDurableStore>,
    ) {
        let local = Arc::new(LocalCache::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let tier = Arc::new(RemoteTier::new(
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::clone(&local),
        ));
        let scheduler = CleanupScheduler::new(
            Arc::clone(&local),
            tier,
            Arc::clone(&durable) as Arc<dyn DurableStore>,
            Duration::from_secs(300),
        );
        (scheduler, local, remote, durable)
    }

    #[tokio::test]
    async fn test_pass_sweeps_all_tiers() {
        let (scheduler, local, remote, durable) = setup();

        local.put(entry("live", 3600));
        local.put(expired_entry("dead-local"));

        // Orphaned index member in today's bucket.
        let today = Utc::now().date_naive();
        remote.index_add(today, &hash("dead-index")).await.unwrap();

        durable.upsert_entry(&entry("live", 3600)).await.unwrap();
        durable
            .upsert_entry(&expired_entry("dead-durable"))
            .await
            .unwrap();

        let cleaned = scheduler.run_cleanup_pass().await;
        assert_eq!(cleaned, 3);
        assert_eq!(scheduler.total_cleaned(), 3);

        assert!(local.contains(&hash("live")));
        assert!(remote.index_members(today).await.unwrap().is_empty());
        assert_eq!(durable.active_entry_count(Utc::now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pass_survives_durable_outage() {
        let (scheduler, local, _, durable) = setup();
        durable.set_available(false);
        local.put(expired_entry("dead-local"));

        let cleaned = scheduler.run_cleanup_pass().await;
        assert_eq!(cleaned, 1);
    }

    #[tokio::test]
    async fn test_background_loop_runs_passes() {
        let (mut scheduler, local, _, _) = setup();
        scheduler.interval = Duration::from_millis(10);
        local.put(expired_entry("dead"));

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;

        assert!(scheduler.total_cleaned() >= 1);
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (scheduler, _, _, _) = setup();
        scheduler.start().await;
        scheduler.start().await;
        scheduler.stop().await;
    }
}
