//! Blacklist engine: the subsystem's front door.
//!
//! Every revocation and validity check goes through [`BlacklistEngine`],
//! which fans writes out across the tiers (local first, then remote, then
//! durable) and reads inward (local, then remote, with the configured
//! failure policy deciding what an outage means).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modelgate_core::TokenHash;
use tracing::{debug, info, warn};

use crate::config::FailurePolicy;
use crate::entry::BlacklistEntry;
use crate::error::BlacklistError;
use crate::local_cache::LocalCache;
use crate::stats::CacheStatsSnapshot;
use crate::store::DurableStore;
use crate::tier::RemoteTier;

/// Coordinates the local cache, the remote tier, and the durable store.
pub struct BlacklistEngine {
    local: Arc<LocalCache>,
    tier: Arc<RemoteTier>,
    durable: Arc<dyn DurableStore>,
    policy: FailurePolicy,
    ready: Arc<AtomicBool>,
}

impl BlacklistEngine {
    #[must_use]
    pub fn new(
        local: Arc<LocalCache>,
        tier: Arc<RemoteTier>,
        durable: Arc<dyn DurableStore>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            local,
            tier,
            durable,
            policy,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Revoke a token: the id is hashed and recorded in every tier.
    ///
    /// The local write always lands, so the revocation takes effect on
    /// this node immediately. Remote and durable writes are best-effort;
    /// failures are logged and left for the sync engine to repair.
    pub async fn add_to_blacklist(
        &self,
        token_id: &str,
        ttl: Duration,
        reason: Option<&str>,
        added_by: Option<&str>,
    ) -> Result<(), BlacklistError> {
        let token_hash = TokenHash::new(token_id)?;
        if ttl.is_zero() {
            return Err(BlacklistError::InvalidTtl {
                detail: "TTL must be positive".to_string(),
            });
        }
        if chrono::Duration::from_std(ttl).is_err() {
            return Err(BlacklistError::InvalidTtl {
                detail: format!("TTL of {} seconds exceeds the supported range", ttl.as_secs()),
            });
        }

        let entry = BlacklistEntry::new(token_hash, ttl, reason, added_by);
        self.local.put(entry.clone());

        if let Err(e) = self.tier.add(&entry, ttl).await {
            self.local.stats().record_error();
            warn!(
                token_hash = %entry.token_hash,
                error = %e,
                "remote blacklist write failed; entry held locally pending sync"
            );
        }

        if let Err(e) = self.durable.upsert_entry(&entry).await {
            warn!(
                token_hash = %entry.token_hash,
                error = %e,
                "durable blacklist write failed; entry held in cache tiers"
            );
        }

        info!(
            token_hash = %entry.token_hash,
            reason = %entry.reason,
            added_by = %entry.added_by,
            ttl_secs = ttl.as_secs(),
            "token added to blacklist"
        );
        Ok(())
    }

    /// Whether the token is currently revoked.
    ///
    /// Checks the local cache first; a local hit never touches the
    /// network. On a miss the remote tier answers. If the remote tier
    /// fails for any reason — unreachable, timed out, or holding data it
    /// cannot decode — the configured [`FailurePolicy`] decides the
    /// answer for tokens the local cache does not know about; the caller
    /// never sees the internal error.
    pub async fn is_blacklisted(&self, token_id: &str) -> Result<bool, BlacklistError> {
        let token_hash = TokenHash::new(token_id)?;

        if self.local.contains(&token_hash) {
            return Ok(true);
        }

        match self.tier.is_blacklisted(&token_hash).await {
            Ok(hit) => Ok(hit),
            Err(e) => {
                self.local.stats().record_error();
                let assumed = match self.policy {
                    FailurePolicy::FailOpen => false,
                    FailurePolicy::FailClosed => true,
                };
                warn!(
                    token_hash = %token_hash,
                    error = %e,
                    policy = ?self.policy,
                    assumed_blacklisted = assumed,
                    "remote tier failed during blacklist check"
                );
                Ok(assumed)
            }
        }
    }

    /// Un-revoke a token across all tiers. Returns whether any tier held
    /// it; a repeat call is a no-op returning `false`.
    pub async fn remove_from_blacklist(&self, token_id: &str) -> Result<bool, BlacklistError> {
        let token_hash = TokenHash::new(token_id)?;

        let had_local = self.local.remove(&token_hash);

        let had_remote = match self.tier.remove(&token_hash).await {
            Ok(had) => had,
            Err(e) => {
                self.local.stats().record_error();
                warn!(
                    token_hash = %token_hash,
                    error = %e,
                    "remote blacklist delete failed"
                );
                false
            }
        };

        let had_durable = match self.durable.delete_entry(&token_hash).await {
            Ok(had) => had,
            Err(e) => {
                warn!(
                    token_hash = %token_hash,
                    error = %e,
                    "durable blacklist delete failed"
                );
                false
            }
        };

        let removed = had_local || had_remote || had_durable;
        if removed {
            info!(token_hash = %token_hash, "token removed from blacklist");
        } else {
            debug!(token_hash = %token_hash, "remove requested for unknown token");
        }
        Ok(removed)
    }

    /// Local-tier counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.local.stats().snapshot()
    }

    /// True once startup recovery has completed (or was never needed).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// The readiness flag, shared with the sync engine so recovery can
    /// gate it.
    #[must_use]
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    /// The configured failure policy.
    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// The local cache tier.
    #[must_use]
    pub fn local_cache(&self) -> &Arc<LocalCache> {
        &self.local
    }
}

impl std::fmt::Debug for BlacklistEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlacklistEngine")
            .field("policy", &self.policy)
            .field("remote", &self.tier.store_type())
            .field("durable", &self.durable.store_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::store::memory::{MemoryDurableStore, MemoryRemoteStore};
    use crate::store::RemoteStore;

    /// Remote store whose reads fail the way the Redis backend does when
    /// a stored entry no longer parses.
    struct CorruptRemoteStore;

    fn decode_failure() -> BlacklistError {
        serde_json::from_str::<BlacklistEntry>("{not json")
            .expect_err("must not parse")
            .into()
    }

    #[async_trait]
    impl RemoteStore for CorruptRemoteStore {
        async fn put_primary(
            &self,
            _entry: &BlacklistEntry,
            _ttl: Duration,
        ) -> Result<(), BlacklistError> {
            Ok(())
        }

        async fn put_backup(
            &self,
            _entry: &BlacklistEntry,
            _ttl: Duration,
        ) -> Result<(), BlacklistError> {
            Ok(())
        }

        async fn exists_primary(&self, _token_hash: &TokenHash) -> Result<bool, BlacklistError> {
            Ok(false)
        }

        async fn exists_backup(&self, _token_hash: &TokenHash) -> Result<bool, BlacklistError> {
            Ok(false)
        }

        async fn get_primary(
            &self,
            _token_hash: &TokenHash,
        ) -> Result<Option<BlacklistEntry>, BlacklistError> {
            Err(decode_failure())
        }

        async fn get_backup(
            &self,
            _token_hash: &TokenHash,
        ) -> Result<Option<BlacklistEntry>, BlacklistError> {
            Err(decode_failure())
        }

        async fn delete(&self, _token_hash: &TokenHash) -> Result<bool, BlacklistError> {
            Ok(false)
        }

        async fn index_add(
            &self,
            _date: NaiveDate,
            _token_hash: &TokenHash,
        ) -> Result<(), BlacklistError> {
            Ok(())
        }

        async fn index_remove(
            &self,
            _date: NaiveDate,
            _token_hash: &TokenHash,
        ) -> Result<bool, BlacklistError> {
            Ok(false)
        }

        async fn index_members(&self, _date: NaiveDate) -> Result<Vec<TokenHash>, BlacklistError> {
            Ok(Vec::new())
        }

        async fn primary_tokens(&self) -> Result<Vec<TokenHash>, BlacklistError> {
            Ok(Vec::new())
        }

        async fn primary_count(&self) -> Result<u64, BlacklistError> {
            Ok(0)
        }

        async fn backup_count(&self) -> Result<u64, BlacklistError> {
            Ok(0)
        }

        fn store_type(&self) -> &'static str {
            "corrupt"
        }
    }

    fn engine_over_corrupt_store(policy: FailurePolicy) -> BlacklistEngine {
        let local = Arc::new(LocalCache::new());
        let tier = Arc::new(RemoteTier::new(
            Arc::new(CorruptRemoteStore),
            Arc::clone(&local),
        ));
        BlacklistEngine::new(local, tier, Arc::new(MemoryDurableStore::new()), policy)
    }

    fn engine_with(
        remote: Arc<MemoryRemoteStore>,
        durable: Arc<MemoryDurableStore>,
        policy: FailurePolicy,
    ) -> BlacklistEngine {
        let local = Arc::new(LocalCache::new());
        let tier = Arc::new(RemoteTier::new(remote, Arc::clone(&local)));
        BlacklistEngine::new(local, tier, durable, policy)
    }

    fn default_engine() -> BlacklistEngine {
        engine_with(
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(MemoryDurableStore::new()),
            FailurePolicy::FailOpen,
        )
    }

    #[tokio::test]
    async fn test_add_then_check() {
        let engine = default_engine();
        engine
            .add_to_blacklist("token-1", Duration::from_secs(60), Some("logout"), None)
            .await
            .unwrap();
        assert!(engine.is_blacklisted("token-1").await.unwrap());
        assert!(!engine.is_blacklisted("token-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_token_id_rejected() {
        let engine = default_engine();
        let err = engine
            .add_to_blacklist("   ", Duration::from_secs(60), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlacklistError::InvalidTokenId(_)));
        assert_eq!(engine.local_cache().len(), 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let engine = default_engine();
        let err = engine
            .add_to_blacklist("token-1", Duration::ZERO, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlacklistError::InvalidTtl { .. }));
        assert_eq!(engine.local_cache().len(), 0);
    }

    #[tokio::test]
    async fn test_add_survives_remote_outage() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let engine = engine_with(Arc::clone(&remote), durable, FailurePolicy::FailOpen);

        remote.set_available(false);
        engine
            .add_to_blacklist("token-1", Duration::from_secs(60), None, None)
            .await
            .unwrap();

        // Held locally; a check on this node still answers true.
        assert!(engine.is_blacklisted("token-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_open_unknown_token_during_outage() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let engine = engine_with(Arc::clone(&remote), durable, FailurePolicy::FailOpen);

        remote.set_available(false);
        assert!(!engine.is_blacklisted("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_closed_unknown_token_during_outage() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let engine = engine_with(Arc::clone(&remote), durable, FailurePolicy::FailClosed);

        remote.set_available(false);
        assert!(engine.is_blacklisted("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let engine = default_engine();
        engine
            .add_to_blacklist("token-1", Duration::from_secs(60), None, None)
            .await
            .unwrap();

        assert!(engine.remove_from_blacklist("token-1").await.unwrap());
        assert!(!engine.is_blacklisted("token-1").await.unwrap());
        assert!(!engine.remove_from_blacklist("token-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_remote_entry_resolves_per_policy() {
        let engine = engine_over_corrupt_store(FailurePolicy::FailOpen);
        assert!(!engine.is_blacklisted("tok-1").await.unwrap());
        assert_eq!(engine.stats().errors, 1);

        let engine = engine_over_corrupt_store(FailurePolicy::FailClosed);
        assert!(engine.is_blacklisted("tok-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_ttl_rejected() {
        let engine = default_engine();
        let err = engine
            .add_to_blacklist("token-1", Duration::from_secs(u64::MAX), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlacklistError::InvalidTtl { .. }));
        assert_eq!(engine.local_cache().len(), 0);
        assert!(!engine.is_blacklisted("token-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_reports_remote_only_entry() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let engine = engine_with(Arc::clone(&remote), durable, FailurePolicy::FailOpen);

        // Entry known only to the remote tier, as after a local eviction
        // with the durable write having failed.
        let hash = TokenHash::new("token-1").unwrap();
        let entry = BlacklistEntry::new(hash, Duration::from_secs(60), None, None);
        remote
            .put_primary(&entry, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(engine.remove_from_blacklist("token-1").await.unwrap());
        assert!(!engine.remove_from_blacklist("token-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_track_lookups() {
        let engine = default_engine();
        engine
            .add_to_blacklist("token-1", Duration::from_secs(60), None, None)
            .await
            .unwrap();

        engine.is_blacklisted("token-1").await.unwrap();
        engine.is_blacklisted("token-1").await.unwrap();

        let stats = engine.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.writes, 1);
    }
}
