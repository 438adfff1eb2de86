//! Postgres-backed durable store.
//!
//! Two tables back this store (schema managed by the deployment's
//! migrations, not by this crate):
//!
//! ```sql
//! CREATE TABLE token_blacklist (
//!     token_hash  TEXT PRIMARY KEY,
//!     user_id     TEXT,
//!     reason      TEXT NOT NULL,
//!     added_by    TEXT NOT NULL,
//!     added_at    TIMESTAMPTZ NOT NULL,
//!     expires_at  TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE token_lifecycle (
//!     id                 UUID PRIMARY KEY,
//!     token_hash         TEXT NOT NULL UNIQUE,
//!     user_id            TEXT,
//!     status             TEXT NOT NULL,
//!     issued_at          TIMESTAMPTZ NOT NULL,
//!     expires_at         TIMESTAMPTZ NOT NULL,
//!     last_status_change TIMESTAMPTZ NOT NULL,
//!     last_change_reason TEXT,
//!     last_changed_by    TEXT,
//!     metadata           JSONB NOT NULL DEFAULT '{}'::jsonb
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modelgate_core::TokenHash;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entry::{BlacklistEntry, TokenLifecycleRecord, TokenStatus};
use crate::error::BlacklistError;
use crate::store::DurableStore;

/// [`DurableStore`] backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    token_hash: String,
    user_id: Option<String>,
    reason: String,
    added_by: String,
    added_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_entry(self) -> Result<BlacklistEntry, BlacklistError> {
        Ok(BlacklistEntry {
            token_hash: TokenHash::new(self.token_hash)?,
            user_id: self.user_id,
            reason: self.reason,
            added_by: self.added_by,
            added_at: self.added_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    token_hash: String,
    user_id: Option<String>,
    status: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_status_change: DateTime<Utc>,
    last_change_reason: Option<String>,
    last_changed_by: Option<String>,
    metadata: serde_json::Value,
}

impl RecordRow {
    fn into_record(self) -> Result<TokenLifecycleRecord, BlacklistError> {
        let status = TokenStatus::from_str_value(&self.status).ok_or_else(|| {
            BlacklistError::DurableUnavailable {
                detail: format!("unknown token status in row: {}", self.status),
            }
        })?;
        let metadata = match self.metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(TokenLifecycleRecord {
            id: self.id,
            token_hash: TokenHash::new(self.token_hash)?,
            user_id: self.user_id,
            status,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            last_status_change: self.last_status_change,
            last_change_reason: self.last_change_reason,
            last_changed_by: self.last_changed_by,
            metadata,
        })
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn upsert_entry(&self, entry: &BlacklistEntry) -> Result<(), BlacklistError> {
        sqlx::query(
            r"
            INSERT INTO token_blacklist (token_hash, user_id, reason, added_by, added_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token_hash) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                reason = EXCLUDED.reason,
                added_by = EXCLUDED.added_by,
                added_at = EXCLUDED.added_at,
                expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(entry.token_hash.as_str())
        .bind(entry.user_id.as_deref())
        .bind(&entry.reason)
        .bind(&entry.added_by)
        .bind(entry.added_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_entry(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<BlacklistEntry>, BlacklistError> {
        let row: Option<EntryRow> = sqlx::query_as(
            r"
            SELECT token_hash, user_id, reason, added_by, added_at, expires_at
            FROM token_blacklist
            WHERE token_hash = $1
            ",
        )
        .bind(token_hash.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(EntryRow::into_entry).transpose()
    }

    async fn delete_entry(&self, token_hash: &TokenHash) -> Result<bool, BlacklistError> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE token_hash = $1")
            .bind(token_hash.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_entries(&self, now: DateTime<Utc>) -> Result<u64, BlacklistError> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn active_entries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlacklistEntry>, BlacklistError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r"
            SELECT token_hash, user_id, reason, added_by, added_at, expires_at
            FROM token_blacklist
            WHERE expires_at > $1
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    async fn active_entry_count(&self, now: DateTime<Utc>) -> Result<u64, BlacklistError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM token_blacklist WHERE expires_at > $1")
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn upsert_record(&self, record: &TokenLifecycleRecord) -> Result<(), BlacklistError> {
        sqlx::query(
            r"
            INSERT INTO token_lifecycle
                (id, token_hash, user_id, status, issued_at, expires_at,
                 last_status_change, last_change_reason, last_changed_by, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (token_hash) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                status = EXCLUDED.status,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                last_status_change = EXCLUDED.last_status_change,
                last_change_reason = EXCLUDED.last_change_reason,
                last_changed_by = EXCLUDED.last_changed_by,
                metadata = EXCLUDED.metadata
            ",
        )
        .bind(record.id)
        .bind(record.token_hash.as_str())
        .bind(record.user_id.as_deref())
        .bind(record.status.as_str())
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.last_status_change)
        .bind(record.last_change_reason.as_deref())
        .bind(record.last_changed_by.as_deref())
        .bind(serde_json::Value::Object(record.metadata.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_record(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<TokenLifecycleRecord>, BlacklistError> {
        let row: Option<RecordRow> = sqlx::query_as(
            r"
            SELECT id, token_hash, user_id, status, issued_at, expires_at,
                   last_status_change, last_change_reason, last_changed_by, metadata
            FROM token_lifecycle
            WHERE token_hash = $1
            ",
        )
        .bind(token_hash.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn expired_active_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenHash>, BlacklistError> {
        let hashes: Vec<String> = sqlx::query_scalar(
            r"
            SELECT token_hash
            FROM token_lifecycle
            WHERE status = 'ACTIVE' AND expires_at <= $1
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        hashes
            .into_iter()
            .map(|h| TokenHash::new(h).map_err(BlacklistError::from))
            .collect()
    }

    async fn count_records_by_status(&self, status: TokenStatus) -> Result<u64, BlacklistError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM token_lifecycle WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}
