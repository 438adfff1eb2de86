//! Redis-backed remote store.
//!
//! Entries are stored as JSON strings under a primary key with the
//! entry's TTL and a backup key with a longer TTL, so a prematurely
//! evicted primary still has a safety net. The expiry index is a set per
//! calendar date, mutated only through SADD/SREM so concurrent
//! revocations cannot lose updates.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use modelgate_core::TokenHash;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::entry::BlacklistEntry;
use crate::error::BlacklistError;
use crate::store::RemoteStore;

const PRIMARY_PREFIX: &str = "blacklist:token:";
const BACKUP_PREFIX: &str = "blacklist:backup:";
const INDEX_PREFIX: &str = "blacklist:expiry:";

/// Index buckets expire on their own two days after last touch; the
/// cleanup sweep only ever looks at today and yesterday.
const INDEX_BUCKET_TTL_SECS: i64 = 2 * 86_400;

/// [`RemoteStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisRemoteStore {
    conn: ConnectionManager,
}

impl RedisRemoteStore {
    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self, BlacklistError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn primary_key(token_hash: &TokenHash) -> String {
        format!("{PRIMARY_PREFIX}{token_hash}")
    }

    fn backup_key(token_hash: &TokenHash) -> String {
        format!("{BACKUP_PREFIX}{token_hash}")
    }

    fn index_key(date: NaiveDate) -> String {
        format!("{INDEX_PREFIX}{date}")
    }

    async fn put_keyed(
        &self,
        key: String,
        entry: &BlacklistEntry,
        ttl: Duration,
    ) -> Result<(), BlacklistError> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, json, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn scan_count(&self, pattern: &str) -> Result<u64, BlacklistError> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(pattern).await?;
        let mut count = 0u64;
        while iter.next_item().await.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for RedisRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRemoteStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteStore for RedisRemoteStore {
    async fn put_primary(
        &self,
        entry: &BlacklistEntry,
        ttl: Duration,
    ) -> Result<(), BlacklistError> {
        self.put_keyed(Self::primary_key(&entry.token_hash), entry, ttl)
            .await
    }

    async fn put_backup(
        &self,
        entry: &BlacklistEntry,
        ttl: Duration,
    ) -> Result<(), BlacklistError> {
        self.put_keyed(Self::backup_key(&entry.token_hash), entry, ttl)
            .await
    }

    async fn exists_primary(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::primary_key(token_hash)).await?;
        Ok(exists)
    }

    async fn exists_backup(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::backup_key(token_hash)).await?;
        Ok(exists)
    }

    async fn get_primary(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(Self::primary_key(token_hash)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_backup(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(Self::backup_key(token_hash)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(vec![Self::primary_key(token_hash), Self::backup_key(token_hash)])
            .await?;
        Ok(removed > 0)
    }

    async fn index_add(
        &self,
        date: NaiveDate,
        token_hash: &TokenHash,
    ) -> Result<(), BlacklistError> {
        let key = Self::index_key(date);
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(&key, token_hash.as_str()).await?;
        let _: () = conn.expire(&key, INDEX_BUCKET_TTL_SECS).await?;
        Ok(())
    }

    async fn index_remove(
        &self,
        date: NaiveDate,
        token_hash: &TokenHash,
    ) -> Result<bool, BlacklistError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .srem(Self::index_key(date), token_hash.as_str())
            .await?;
        Ok(removed > 0)
    }

    async fn index_members(&self, date: NaiveDate) -> Result<Vec<TokenHash>, BlacklistError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(Self::index_key(date)).await?;
        Ok(members
            .into_iter()
            .filter_map(|m| TokenHash::new(m).ok())
            .collect())
    }

    async fn primary_tokens(&self) -> Result<Vec<TokenHash>, BlacklistError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{PRIMARY_PREFIX}*");
        let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(&pattern).await?;
        let mut tokens = Vec::new();
        while let Some(key) = iter.next_item().await {
            if let Some(id) = key.strip_prefix(PRIMARY_PREFIX) {
                if let Ok(token_hash) = TokenHash::new(id) {
                    tokens.push(token_hash);
                }
            }
        }
        Ok(tokens)
    }

    async fn primary_count(&self) -> Result<u64, BlacklistError> {
        self.scan_count(&format!("{PRIMARY_PREFIX}*")).await
    }

    async fn backup_count(&self) -> Result<u64, BlacklistError> {
        self.scan_count(&format!("{BACKUP_PREFIX}*")).await
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
