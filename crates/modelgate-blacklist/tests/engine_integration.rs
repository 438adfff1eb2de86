//! End-to-end tests over the assembled subsystem with in-memory backends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use modelgate_blacklist::store::memory::{MemoryDurableStore, MemoryRemoteStore};
use modelgate_blacklist::{
    assemble, BlacklistConfig, BlacklistEntry, BlacklistError, BlacklistRuntime, DurableStore,
    FailurePolicy, RemoteStore, TokenHash, TokenStatus,
};

struct Harness {
    runtime: BlacklistRuntime,
    remote: Arc<MemoryRemoteStore>,
    durable: Arc<MemoryDurableStore>,
}

fn harness_with(config: BlacklistConfig) -> Harness {
    let remote = Arc::new(MemoryRemoteStore::new());
    let durable = Arc::new(MemoryDurableStore::new());
    let runtime = assemble(
        &config,
        Arc::clone(&remote) as Arc<dyn RemoteStore>,
        Arc::clone(&durable) as Arc<dyn DurableStore>,
    );
    Harness {
        runtime,
        remote,
        durable,
    }
}

fn harness() -> Harness {
    harness_with(BlacklistConfig::default())
}

#[tokio::test]
async fn revoked_token_is_reported_blacklisted() {
    let h = harness();
    h.runtime
        .engine
        .add_to_blacklist("tok-1", Duration::from_secs(600), Some("logout"), Some("u-1"))
        .await
        .unwrap();

    assert!(h.runtime.engine.is_blacklisted("tok-1").await.unwrap());
    assert!(!h.runtime.engine.is_blacklisted("tok-2").await.unwrap());
}

#[tokio::test]
async fn blank_token_id_is_rejected_without_side_effects() {
    let h = harness();
    let err = h
        .runtime
        .engine
        .add_to_blacklist("", Duration::from_secs(600), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BlacklistError::InvalidTokenId(_)));
    assert_eq!(h.remote.primary_count().await.unwrap(), 0);
    assert_eq!(h.durable.active_entry_count(chrono::Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn entry_disappears_after_its_ttl() {
    let h = harness();
    h.runtime
        .engine
        .add_to_blacklist("tok-1", Duration::from_millis(50), None, None)
        .await
        .unwrap();
    assert!(h.runtime.engine.is_blacklisted("tok-1").await.unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.runtime.engine.is_blacklisted("tok-1").await.unwrap());
}

#[tokio::test]
async fn local_cache_bound_evicts_soonest_expiry_but_remote_still_answers() {
    let config = BlacklistConfig {
        max_local_entries: 5,
        ..BlacklistConfig::default()
    };
    let h = harness_with(config);

    // "victim" has the soonest expiry; inserting a sixth entry evicts it
    // from the local cache only.
    h.runtime
        .engine
        .add_to_blacklist("victim", Duration::from_secs(60), None, None)
        .await
        .unwrap();
    for i in 0..5 {
        h.runtime
            .engine
            .add_to_blacklist(&format!("tok-{i}"), Duration::from_secs(3600), None, None)
            .await
            .unwrap();
    }

    assert_eq!(h.runtime.engine.local_cache().len(), 5);
    assert!(h.runtime.engine.is_blacklisted("victim").await.unwrap());
}

#[tokio::test]
async fn local_hit_survives_remote_outage() {
    let h = harness();
    h.runtime
        .engine
        .add_to_blacklist("tok-1", Duration::from_secs(600), None, None)
        .await
        .unwrap();

    h.remote.set_available(false);
    assert!(h.runtime.engine.is_blacklisted("tok-1").await.unwrap());
}

#[tokio::test]
async fn outage_answers_follow_the_failure_policy() {
    let open = harness_with(BlacklistConfig {
        failure_policy: FailurePolicy::FailOpen,
        ..BlacklistConfig::default()
    });
    open.remote.set_available(false);
    assert!(!open.runtime.engine.is_blacklisted("unknown").await.unwrap());

    let closed = harness_with(BlacklistConfig {
        failure_policy: FailurePolicy::FailClosed,
        ..BlacklistConfig::default()
    });
    closed.remote.set_available(false);
    assert!(closed.runtime.engine.is_blacklisted("unknown").await.unwrap());
}

#[tokio::test]
async fn restart_recovery_restores_revocations_from_durable_store() {
    let h = harness();
    h.runtime
        .engine
        .add_to_blacklist("tok-1", Duration::from_secs(3600), None, None)
        .await
        .unwrap();

    // Simulated restart: fresh remote and local tiers, same durable store.
    let reborn = assemble(
        &BlacklistConfig::default(),
        Arc::new(MemoryRemoteStore::new()) as Arc<dyn RemoteStore>,
        Arc::clone(&h.durable) as Arc<dyn DurableStore>,
    );
    assert_eq!(reborn.engine.local_cache().len(), 0);

    let result = reborn.sync.perform_startup_recovery().await.unwrap();
    assert!(result.success);
    assert!(reborn.engine.is_ready());
    assert!(reborn.engine.is_blacklisted("tok-1").await.unwrap());
}

#[tokio::test]
async fn background_sync_repairs_remote_drift() {
    let h = harness();
    h.runtime
        .engine
        .add_to_blacklist("tok-1", Duration::from_secs(3600), None, None)
        .await
        .unwrap();

    // Remote loses the entry; durable still has it.
    h.remote.delete(&"tok-1".parse().unwrap()).await.unwrap();
    h.runtime.engine.local_cache().remove(&"tok-1".parse().unwrap());
    assert!(!h.runtime.engine.is_blacklisted("tok-1").await.unwrap());

    let result = h.runtime.sync.perform_bidirectional_sync().await;
    assert!(result.success);
    assert!(h.runtime.engine.is_blacklisted("tok-1").await.unwrap());
}

#[tokio::test]
async fn remove_is_idempotent_across_all_tiers() {
    let h = harness();
    h.runtime
        .engine
        .add_to_blacklist("tok-1", Duration::from_secs(600), None, None)
        .await
        .unwrap();

    assert!(h.runtime.engine.remove_from_blacklist("tok-1").await.unwrap());
    assert!(!h.runtime.engine.is_blacklisted("tok-1").await.unwrap());
    assert_eq!(h.remote.primary_count().await.unwrap(), 0);
    assert!(!h.runtime.engine.remove_from_blacklist("tok-1").await.unwrap());
}

#[tokio::test]
async fn lifecycle_revocation_is_visible_through_the_engine() {
    let h = harness();
    let now = chrono::Utc::now();
    h.runtime
        .lifecycle
        .record_issued("tok-1", Some("u-1"), now, now + chrono::Duration::hours(1))
        .await
        .unwrap();

    h.runtime
        .lifecycle
        .update_status("tok-1", TokenStatus::Revoked, "compromised", "admin")
        .await
        .unwrap();

    assert!(h.runtime.engine.is_blacklisted("tok-1").await.unwrap());
    let record = h.runtime.lifecycle.get_record("tok-1").await.unwrap().unwrap();
    assert_eq!(record.status, TokenStatus::Revoked);
}

/// Remote store whose reads stall far past the operation budget, as a
/// saturated Redis would; writes go through normally.
struct StalledReadStore {
    inner: MemoryRemoteStore,
    read_delay: Duration,
}

impl StalledReadStore {
    async fn stall(&self) {
        tokio::time::sleep(self.read_delay).await;
    }
}

#[async_trait]
impl RemoteStore for StalledReadStore {
    async fn put_primary(&self, entry: &BlacklistEntry, ttl: Duration) -> Result<(), BlacklistError> {
        self.inner.put_primary(entry, ttl).await
    }

    async fn put_backup(&self, entry: &BlacklistEntry, ttl: Duration) -> Result<(), BlacklistError> {
        self.inner.put_backup(entry, ttl).await
    }

    async fn exists_primary(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        self.stall().await;
        self.inner.exists_primary(token_hash).await
    }

    async fn exists_backup(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        self.stall().await;
        self.inner.exists_backup(token_hash).await
    }

    async fn get_primary(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        self.stall().await;
        self.inner.get_primary(token_hash).await
    }

    async fn get_backup(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        self.stall().await;
        self.inner.get_backup(token_hash).await
    }

    async fn delete(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        self.inner.delete(token_hash).await
    }

    async fn index_add(&self, date: NaiveDate, token_hash: &TokenHash) -> Result<(), BlacklistError> {
        self.inner.index_add(date, token_hash).await
    }

    async fn index_remove(
        &self,
        date: NaiveDate,
        token_hash: &TokenHash,
    ) -> Result<bool, BlacklistError> {
        self.inner.index_remove(date, token_hash).await
    }

    async fn index_members(&self, date: NaiveDate) -> Result<Vec<TokenHash>, BlacklistError> {
        self.inner.index_members(date).await
    }

    async fn primary_tokens(&self) -> Result<Vec<TokenHash>, BlacklistError> {
        self.inner.primary_tokens().await
    }

    async fn primary_count(&self) -> Result<u64, BlacklistError> {
        self.inner.primary_count().await
    }

    async fn backup_count(&self) -> Result<u64, BlacklistError> {
        self.inner.backup_count().await
    }

    fn store_type(&self) -> &'static str {
        self.inner.store_type()
    }
}

#[tokio::test]
async fn remote_timeout_keeps_local_hits_fast_and_resolves_misses_per_policy() {
    let config = BlacklistConfig {
        remote_timeout: Duration::from_millis(50),
        ..BlacklistConfig::default()
    };
    let remote = Arc::new(StalledReadStore {
        inner: MemoryRemoteStore::new(),
        read_delay: Duration::from_secs(30),
    });
    let runtime = assemble(
        &config,
        remote as Arc<dyn RemoteStore>,
        Arc::new(MemoryDurableStore::new()) as Arc<dyn DurableStore>,
    );

    runtime
        .engine
        .add_to_blacklist("tok-1", Duration::from_secs(600), None, None)
        .await
        .unwrap();

    // Local hit: answered without any remote round trip.
    let started = Instant::now();
    assert!(runtime.engine.is_blacklisted("tok-1").await.unwrap());
    assert!(started.elapsed() < Duration::from_millis(500));

    // Local miss: the remote read hits its timeout and the fail-open
    // policy answers, well inside the stalled store's delay.
    let started = Instant::now();
    assert!(!runtime.engine.is_blacklisted("unknown").await.unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cleanup_pass_reclaims_expired_state() {
    let h = harness();
    h.runtime
        .engine
        .add_to_blacklist("short", Duration::from_millis(20), None, None)
        .await
        .unwrap();
    h.runtime
        .engine
        .add_to_blacklist("long", Duration::from_secs(3600), None, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let cleaned = h.runtime.cleanup.run_cleanup_pass().await;
    assert!(cleaned >= 1);

    assert_eq!(h.runtime.engine.local_cache().len(), 1);
    assert!(h.runtime.engine.is_blacklisted("long").await.unwrap());
}
