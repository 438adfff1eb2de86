//! Remote tier coordination.
//!
//! [`RemoteTier`] wraps a [`RemoteStore`] with the dual-key write
//! discipline, operation timeouts, the expiry index, and local cache-fill
//! on hits. Every remote call is bounded by `op_timeout` so a slow store
//! degrades into [`BlacklistError::RemoteUnavailable`] instead of stalling
//! the request path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use modelgate_core::TokenHash;
use tracing::{debug, warn};

use crate::entry::BlacklistEntry;
use crate::error::BlacklistError;
use crate::local_cache::LocalCache;
use crate::store::RemoteStore;

/// Default bound on any single remote operation.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default extra TTL on the backup key beyond the primary's.
pub const DEFAULT_BACKUP_GRACE: Duration = Duration::from_secs(3600);

/// Default cap on the TTL of entries cache-filled into the local tier.
pub const DEFAULT_CACHE_FILL_TTL: Duration = Duration::from_secs(3600);

/// Default number of future days probed when removing an index entry.
pub const DEFAULT_INDEX_PROBE_DAYS: u64 = 7;

/// The shared remote tier, sitting between the local cache and the
/// durable store.
pub struct RemoteTier {
    store: Arc<dyn RemoteStore>,
    local: Arc<LocalCache>,
    op_timeout: Duration,
    backup_grace: Duration,
    cache_fill_ttl: Duration,
    index_probe_days: u64,
}

impl RemoteTier {
    /// Create a tier with default timings.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, local: Arc<LocalCache>) -> Self {
        Self {
            store,
            local,
            op_timeout: DEFAULT_OP_TIMEOUT,
            backup_grace: DEFAULT_BACKUP_GRACE,
            cache_fill_ttl: DEFAULT_CACHE_FILL_TTL,
            index_probe_days: DEFAULT_INDEX_PROBE_DAYS,
        }
    }

    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    #[must_use]
    pub fn with_backup_grace(mut self, backup_grace: Duration) -> Self {
        self.backup_grace = backup_grace;
        self
    }

    #[must_use]
    pub fn with_cache_fill_ttl(mut self, cache_fill_ttl: Duration) -> Self {
        self.cache_fill_ttl = cache_fill_ttl;
        self
    }

    #[must_use]
    pub fn with_index_probe_days(mut self, days: u64) -> Self {
        self.index_probe_days = days;
        self
    }

    /// Write an entry to the remote tier: primary key with the entry's
    /// TTL, backup key with TTL plus grace, and the expiry-index bucket.
    ///
    /// The primary write must succeed; backup and index failures are
    /// logged and tolerated, since the entry is already findable.
    pub async fn add(&self, entry: &BlacklistEntry, ttl: Duration) -> Result<(), BlacklistError> {
        self.bounded(self.store.put_primary(entry, ttl)).await?;

        let backup_ttl = ttl + self.backup_grace;
        if let Err(e) = self.bounded(self.store.put_backup(entry, backup_ttl)).await {
            warn!(
                token_hash = %entry.token_hash,
                error = %e,
                "backup write failed; primary entry is in place"
            );
        }

        if let Err(e) = self
            .bounded(self.store.index_add(entry.expiry_bucket(), &entry.token_hash))
            .await
        {
            warn!(
                token_hash = %entry.token_hash,
                bucket = %entry.expiry_bucket(),
                error = %e,
                "expiry index add failed"
            );
        }

        Ok(())
    }

    /// Check the remote tier: primary first, then backup. A live hit on
    /// either key is copied into the local cache with its TTL capped at
    /// `cache_fill_ttl`, so later checks for the same token stay local.
    pub async fn is_blacklisted(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        if let Some(entry) = self.bounded(self.store.get_primary(token_hash)).await? {
            if !entry.is_expired() {
                self.cache_fill(entry);
                return Ok(true);
            }
        }

        if let Some(entry) = self.bounded(self.store.get_backup(token_hash)).await? {
            if !entry.is_expired() {
                debug!(token_hash = %token_hash, "hit on backup key only");
                self.cache_fill(entry);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Delete both remote keys and purge the token from the expiry index.
    /// Returns whether a live remote key existed.
    ///
    /// The entry's bucket date is unknown here, so the index is probed
    /// from today through `index_probe_days` days out; entries further out
    /// are left for their bucket's own expiry.
    pub async fn remove(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        let had_keys = self.bounded(self.store.delete(token_hash)).await?;

        let today = Utc::now().date_naive();
        for offset in 0..=self.index_probe_days {
            let Some(date) = today.checked_add_days(Days::new(offset)) else {
                break;
            };
            match self.bounded(self.store.index_remove(date, token_hash)).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        token_hash = %token_hash,
                        bucket = %date,
                        error = %e,
                        "expiry index probe failed"
                    );
                }
            }
        }

        Ok(had_keys)
    }

    /// Sweep the given index buckets, dropping members whose remote keys
    /// are gone. Returns the number of index entries removed; a failing
    /// bucket is logged and skipped without aborting the rest.
    pub async fn sweep_buckets(&self, dates: &[NaiveDate]) -> usize {
        let mut removed = 0;
        for &date in dates {
            match self.sweep_bucket(date).await {
                Ok(count) => removed += count,
                Err(e) => {
                    warn!(bucket = %date, error = %e, "index bucket sweep failed");
                }
            }
        }
        removed
    }

    async fn sweep_bucket(&self, date: NaiveDate) -> Result<usize, BlacklistError> {
        let members = self.bounded(self.store.index_members(date)).await?;
        let mut removed = 0;
        for token_hash in members {
            let live = self.bounded(self.store.exists_primary(&token_hash)).await?
                || self.bounded(self.store.exists_backup(&token_hash)).await?;
            if !live {
                // Purges TTL-dead keys in backends that only hide them.
                self.bounded(self.store.delete(&token_hash)).await?;
                if self.bounded(self.store.index_remove(date, &token_hash)).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// All tokens with a live primary entry. Sync engine use only.
    pub async fn primary_tokens(&self) -> Result<Vec<TokenHash>, BlacklistError> {
        self.bounded(self.store.primary_tokens()).await
    }

    /// Fetch the primary entry, if present.
    pub async fn get_primary(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        self.bounded(self.store.get_primary(token_hash)).await
    }

    /// Count of live primary entries.
    pub async fn primary_count(&self) -> Result<u64, BlacklistError> {
        self.bounded(self.store.primary_count()).await
    }

    /// Count of live backup entries.
    pub async fn backup_count(&self) -> Result<u64, BlacklistError> {
        self.bounded(self.store.backup_count()).await
    }

    /// Backend name for logging.
    #[must_use]
    pub fn store_type(&self) -> &'static str {
        self.store.store_type()
    }

    fn cache_fill(&self, mut entry: BlacklistEntry) {
        let cap = Utc::now()
            + chrono::Duration::from_std(self.cache_fill_ttl)
                .unwrap_or_else(|_| chrono::Duration::zero());
        if entry.expires_at > cap {
            entry.expires_at = cap;
        }
        self.local.put(entry);
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, BlacklistError>
    where
        F: Future<Output = Result<T, BlacklistError>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(BlacklistError::RemoteUnavailable {
                detail: format!("remote operation timed out after {:?}", self.op_timeout),
            }),
        }
    }
}

impl std::fmt::Debug for RemoteTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTier")
            .field("store_type", &self.store.store_type())
            .field("op_timeout", &self.op_timeout)
            .field("backup_grace", &self.backup_grace)
            .finish_non_exhaustive()
    }
}
