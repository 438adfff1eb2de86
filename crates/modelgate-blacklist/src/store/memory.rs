//! In-memory storage backends.
//!
//! Used for single-node deployments without Redis/Postgres, and as test
//! doubles. Both stores honor TTLs physically (entries past their write
//! deadline are invisible) and can be flipped unavailable to exercise the
//! degraded-mode paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use modelgate_core::TokenHash;
use tokio::sync::RwLock;

use crate::entry::{BlacklistEntry, TokenLifecycleRecord, TokenStatus};
use crate::error::BlacklistError;
use crate::store::{DurableStore, RemoteStore};

/// A keyed entry with its physical TTL deadline.
#[derive(Debug, Clone)]
struct TtlEntry {
    entry: BlacklistEntry,
    deadline: DateTime<Utc>,
}

impl TtlEntry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.deadline > now
    }
}

/// In-memory [`RemoteStore`].
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    primary: RwLock<HashMap<TokenHash, TtlEntry>>,
    backup: RwLock<HashMap<TokenHash, TtlEntry>>,
    index: RwLock<HashMap<NaiveDate, HashSet<TokenHash>>>,
    available: AtomicBool,
    backup_available: AtomicBool,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: RwLock::new(HashMap::new()),
            backup: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            backup_available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage of the whole remote tier.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate a failure of backup writes only.
    pub fn set_backup_available(&self, available: bool) {
        self.backup_available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BlacklistError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BlacklistError::RemoteUnavailable {
                detail: "memory remote store marked unavailable".to_string(),
            })
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn put_primary(
        &self,
        entry: &BlacklistEntry,
        ttl: Duration,
    ) -> Result<(), BlacklistError> {
        self.check_available()?;
        let deadline = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.primary.write().await.insert(
            entry.token_hash.clone(),
            TtlEntry {
                entry: entry.clone(),
                deadline,
            },
        );
        Ok(())
    }

    async fn put_backup(
        &self,
        entry: &BlacklistEntry,
        ttl: Duration,
    ) -> Result<(), BlacklistError> {
        self.check_available()?;
        if !self.backup_available.load(Ordering::SeqCst) {
            return Err(BlacklistError::RemoteUnavailable {
                detail: "memory backup store marked unavailable".to_string(),
            });
        }
        let deadline = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.backup.write().await.insert(
            entry.token_hash.clone(),
            TtlEntry {
                entry: entry.clone(),
                deadline,
            },
        );
        Ok(())
    }

    async fn exists_primary(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .primary
            .read()
            .await
            .get(token_hash)
            .is_some_and(|e| e.live(now)))
    }

    async fn exists_backup(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .backup
            .read()
            .await
            .get(token_hash)
            .is_some_and(|e| e.live(now)))
    }

    async fn get_primary(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .primary
            .read()
            .await
            .get(token_hash)
            .filter(|e| e.live(now))
            .map(|e| e.entry.clone()))
    }

    async fn get_backup(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .backup
            .read()
            .await
            .get(token_hash)
            .filter(|e| e.live(now))
            .map(|e| e.entry.clone()))
    }

    async fn delete(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        self.check_available()?;
        let now = Utc::now();
        let had_primary = self
            .primary
            .write()
            .await
            .remove(token_hash)
            .is_some_and(|e| e.live(now));
        let had_backup = self
            .backup
            .write()
            .await
            .remove(token_hash)
            .is_some_and(|e| e.live(now));
        Ok(had_primary || had_backup)
    }

    async fn index_add(
        &self,
        date: NaiveDate,
        token_hash: &TokenHash,
    ) -> Result<(), BlacklistError> {
        self.check_available()?;
        self.index
            .write()
            .await
            .entry(date)
            .or_default()
            .insert(token_hash.clone());
        Ok(())
    }

    async fn index_remove(
        &self,
        date: NaiveDate,
        token_hash: &TokenHash,
    ) -> Result<bool, BlacklistError> {
        self.check_available()?;
        let mut index = self.index.write().await;
        Ok(index
            .get_mut(&date)
            .is_some_and(|bucket| bucket.remove(token_hash)))
    }

    async fn index_members(&self, date: NaiveDate) -> Result<Vec<TokenHash>, BlacklistError> {
        self.check_available()?;
        Ok(self
            .index
            .read()
            .await
            .get(&date)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn primary_tokens(&self) -> Result<Vec<TokenHash>, BlacklistError> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .primary
            .read()
            .await
            .values()
            .filter(|e| e.live(now))
            .map(|e| e.entry.token_hash.clone())
            .collect())
    }

    async fn primary_count(&self) -> Result<u64, BlacklistError> {
        Ok(self.primary_tokens().await?.len() as u64)
    }

    async fn backup_count(&self) -> Result<u64, BlacklistError> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .backup
            .read()
            .await
            .values()
            .filter(|e| e.live(now))
            .count() as u64)
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

/// In-memory [`DurableStore`].
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    entries: RwLock<HashMap<TokenHash, BlacklistEntry>>,
    records: RwLock<HashMap<TokenHash, TokenLifecycleRecord>>,
    available: AtomicBool,
}

impl MemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage of the system of record.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BlacklistError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BlacklistError::DurableUnavailable {
                detail: "memory durable store marked unavailable".to_string(),
            })
        }
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn upsert_entry(&self, entry: &BlacklistEntry) -> Result<(), BlacklistError> {
        self.check_available()?;
        self.entries
            .write()
            .await
            .insert(entry.token_hash.clone(), entry.clone());
        Ok(())
    }

    async fn find_entry(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        self.check_available()?;
        Ok(self.entries.read().await.get(token_hash).cloned())
    }

    async fn delete_entry(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        self.check_available()?;
        Ok(self.entries.write().await.remove(token_hash).is_some())
    }

    async fn delete_expired_entries(&self, now: DateTime<Utc>) -> Result<u64, BlacklistError> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok((before - entries.len()) as u64)
    }

    async fn active_entries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlacklistEntry>, BlacklistError> {
        self.check_available()?;
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired_at(now))
            .cloned()
            .collect())
    }

    async fn active_entry_count(&self, now: DateTime<Utc>) -> Result<u64, BlacklistError> {
        Ok(self.active_entries(now).await?.len() as u64)
    }

    async fn upsert_record(&self, record: &TokenLifecycleRecord) -> Result<(), BlacklistError> {
        self.check_available()?;
        self.records
            .write()
            .await
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn find_record(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<TokenLifecycleRecord>, BlacklistError> {
        self.check_available()?;
        Ok(self.records.read().await.get(token_hash).cloned())
    }

    async fn expired_active_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenHash>, BlacklistError> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == TokenStatus::Active && r.expires_at <= now)
            .map(|r| r.token_hash.clone())
            .collect())
    }

    async fn count_records_by_status(&self, status: TokenStatus) -> Result<u64, BlacklistError> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .count() as u64)
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
