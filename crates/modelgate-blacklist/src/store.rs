//! Storage tier traits.
//!
//! Two seams separate the engine from its storage:
//!
//! - [`RemoteStore`] — the fast shared tier: a keyed store with TTL
//!   (primary + backup keys) and a day-bucketed expiry index mutated via
//!   atomic set primitives.
//! - [`DurableStore`] — the system of record: blacklist entries plus the
//!   full token lifecycle table, scanned only by repair and recovery,
//!   never on the hot path.
//!
//! Backends are selected at startup by configuration; see
//! [`crate::config::BlacklistConfig`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use modelgate_core::TokenHash;

use crate::entry::{BlacklistEntry, TokenLifecycleRecord, TokenStatus};
use crate::error::BlacklistError;

pub mod memory;
pub mod postgres;
pub mod redis;

/// The shared remote tier: primary/backup keyed entries with TTL plus the
/// expiry index.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write the primary keyed entry with the given TTL.
    async fn put_primary(&self, entry: &BlacklistEntry, ttl: Duration)
        -> Result<(), BlacklistError>;

    /// Write the backup keyed entry with the given (longer) TTL.
    async fn put_backup(&self, entry: &BlacklistEntry, ttl: Duration)
        -> Result<(), BlacklistError>;

    /// Whether a primary entry exists for the token.
    async fn exists_primary(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError>;

    /// Whether a backup entry exists for the token.
    async fn exists_backup(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError>;

    /// Fetch the primary entry, if present.
    async fn get_primary(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError>;

    /// Fetch the backup entry, if present.
    async fn get_backup(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError>;

    /// Delete both the primary and backup keys. Returns whether either
    /// key was live; no error if absent.
    async fn delete(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError>;

    /// Add a token to the expiry-index bucket for `date`. Atomic
    /// add-to-set; safe under concurrent revocations.
    async fn index_add(&self, date: NaiveDate, token_hash: &TokenHash)
        -> Result<(), BlacklistError>;

    /// Remove a token from the bucket for `date`. Returns whether the
    /// bucket contained it.
    async fn index_remove(
        &self,
        date: NaiveDate,
        token_hash: &TokenHash,
    ) -> Result<bool, BlacklistError>;

    /// All tokens in the bucket for `date`.
    async fn index_members(&self, date: NaiveDate) -> Result<Vec<TokenHash>, BlacklistError>;

    /// All tokens with a live primary entry. Used by the sync engine,
    /// never on the request path.
    async fn primary_tokens(&self) -> Result<Vec<TokenHash>, BlacklistError>;

    /// Count of live primary entries.
    async fn primary_count(&self) -> Result<u64, BlacklistError>;

    /// Count of live backup entries.
    async fn backup_count(&self) -> Result<u64, BlacklistError>;

    /// Backend name for logging.
    fn store_type(&self) -> &'static str;
}

/// The durable system of record.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace a blacklist entry row.
    async fn upsert_entry(&self, entry: &BlacklistEntry) -> Result<(), BlacklistError>;

    /// Fetch a blacklist entry by token hash.
    async fn find_entry(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError>;

    /// Delete a blacklist entry. Returns whether a row existed.
    async fn delete_entry(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError>;

    /// Delete all entries whose expiry has passed. Returns rows removed.
    async fn delete_expired_entries(&self, now: DateTime<Utc>) -> Result<u64, BlacklistError>;

    /// All entries that are still unexpired at `now`.
    async fn active_entries(&self, now: DateTime<Utc>)
        -> Result<Vec<BlacklistEntry>, BlacklistError>;

    /// Count of unexpired entries.
    async fn active_entry_count(&self, now: DateTime<Utc>) -> Result<u64, BlacklistError>;

    /// Insert or replace a lifecycle record, keyed by token hash.
    async fn upsert_record(&self, record: &TokenLifecycleRecord) -> Result<(), BlacklistError>;

    /// Fetch a lifecycle record by token hash.
    async fn find_record(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<TokenLifecycleRecord>, BlacklistError>;

    /// Token hashes of ACTIVE records whose natural expiry has passed.
    async fn expired_active_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenHash>, BlacklistError>;

    /// Count lifecycle records in the given status.
    async fn count_records_by_status(&self, status: TokenStatus) -> Result<u64, BlacklistError>;

    /// Backend name for logging.
    fn store_type(&self) -> &'static str;
}
