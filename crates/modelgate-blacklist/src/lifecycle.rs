//! Token lifecycle tracking.
//!
//! Every issued token gets a durable lifecycle record; revocation and
//! natural expiry move it through the `ACTIVE -> REVOKED | EXPIRED`
//! state machine. Revoking a token also fans the revocation out to the
//! blacklist engine so validity checks see it immediately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use modelgate_core::TokenHash;
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::BlacklistEngine;
use crate::entry::{TokenLifecycleRecord, TokenStatus};
use crate::error::BlacklistError;
use crate::store::DurableStore;

/// Aggregate counts over the lifecycle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub total: u64,
    pub active: u64,
    pub revoked: u64,
    pub expired: u64,
}

/// Manages lifecycle records in the durable store.
pub struct TokenLifecycleManager {
    durable: Arc<dyn DurableStore>,
    engine: Arc<BlacklistEngine>,
}

impl TokenLifecycleManager {
    #[must_use]
    pub fn new(durable: Arc<dyn DurableStore>, engine: Arc<BlacklistEngine>) -> Self {
        Self { durable, engine }
    }

    /// Record a freshly issued token as `ACTIVE`.
    pub async fn record_issued(
        &self,
        token_id: &str,
        user_id: Option<&str>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<TokenLifecycleRecord, BlacklistError> {
        let token_hash = TokenHash::new(token_id)?;
        let record = TokenLifecycleRecord::new(
            token_hash,
            user_id.map(str::to_string),
            issued_at,
            expires_at,
        );
        self.durable.upsert_record(&record).await?;
        info!(
            token_hash = %record.token_hash,
            user_id = record.user_id.as_deref().unwrap_or("-"),
            "token lifecycle record created"
        );
        Ok(record)
    }

    /// Change a token's lifecycle status.
    ///
    /// A transition to the current status is a no-op and succeeds even
    /// out of a terminal state; any other transition out of `REVOKED` or
    /// `EXPIRED` is rejected. Moving to `REVOKED` also blacklists the
    /// token for its remaining natural lifetime, unless that lifetime has
    /// already run out.
    pub async fn update_status(
        &self,
        token_id: &str,
        new_status: TokenStatus,
        reason: &str,
        changed_by: &str,
    ) -> Result<TokenLifecycleRecord, BlacklistError> {
        let token_hash = TokenHash::new(token_id)?;
        let mut record = self
            .durable
            .find_record(&token_hash)
            .await?
            .ok_or_else(|| BlacklistError::RecordNotFound {
                token_hash: token_hash.to_string(),
            })?;

        if record.status == new_status {
            return Ok(record);
        }
        if !record.status.can_transition_to(new_status) {
            return Err(BlacklistError::InvalidTransition {
                from: record.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let old_status = record.status;
        record.apply_status(new_status, reason, changed_by);
        self.durable.upsert_record(&record).await?;
        info!(
            token_hash = %record.token_hash,
            from = %old_status,
            to = %new_status,
            reason = %reason,
            changed_by = %changed_by,
            "token status changed"
        );

        if new_status == TokenStatus::Revoked {
            self.blacklist_revoked(&record, reason, changed_by).await;
        }

        Ok(record)
    }

    /// Move every `ACTIVE` record past its natural expiry to `EXPIRED`.
    /// Returns the number transitioned. Revoked records are untouched so
    /// the revocation stays on the audit trail.
    pub async fn update_expired_tokens(&self) -> Result<u64, BlacklistError> {
        let now = Utc::now();
        let expired = self.durable.expired_active_records(now).await?;
        let mut transitioned = 0;

        for token_hash in expired {
            match self
                .update_status(
                    token_hash.as_str(),
                    TokenStatus::Expired,
                    "natural expiry",
                    "system",
                )
                .await
            {
                Ok(_) => transitioned += 1,
                Err(e) => {
                    warn!(token_hash = %token_hash, error = %e, "expiry transition failed");
                }
            }
        }

        if transitioned > 0 {
            info!(count = transitioned, "expired tokens transitioned");
        }
        Ok(transitioned)
    }

    /// Apply one status change to many tokens, best-effort. Returns how
    /// many succeeded; failures are logged and skipped.
    pub async fn batch_update_status(
        &self,
        token_ids: &[String],
        new_status: TokenStatus,
        reason: &str,
        changed_by: &str,
    ) -> u64 {
        let mut succeeded = 0;
        for token_id in token_ids {
            match self
                .update_status(token_id, new_status, reason, changed_by)
                .await
            {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    warn!(error = %e, "batch status update failed for one token");
                }
            }
        }
        succeeded
    }

    /// Look up a lifecycle record.
    pub async fn get_record(
        &self,
        token_id: &str,
    ) -> Result<Option<TokenLifecycleRecord>, BlacklistError> {
        let token_hash = TokenHash::new(token_id)?;
        self.durable.find_record(&token_hash).await
    }

    /// Counts per lifecycle status.
    pub async fn get_stats(&self) -> Result<LifecycleStats, BlacklistError> {
        let active = self
            .durable
            .count_records_by_status(TokenStatus::Active)
            .await?;
        let revoked = self
            .durable
            .count_records_by_status(TokenStatus::Revoked)
            .await?;
        let expired = self
            .durable
            .count_records_by_status(TokenStatus::Expired)
            .await?;
        Ok(LifecycleStats {
            total: active + revoked + expired,
            active,
            revoked,
            expired,
        })
    }

    async fn blacklist_revoked(&self, record: &TokenLifecycleRecord, reason: &str, actor: &str) {
        let Ok(remaining) = (record.expires_at - Utc::now()).to_std() else {
            // Already past natural expiry; nothing left to blacklist.
            return;
        };
        if let Err(e) = self
            .engine
            .add_to_blacklist(
                record.token_hash.as_str(),
                remaining,
                Some(reason),
                Some(actor),
            )
            .await
        {
            warn!(
                token_hash = %record.token_hash,
                error = %e,
                "revoked token could not be blacklisted"
            );
        }
    }
}

impl std::fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("durable", &self.durable.store_type())
            .finish_non_exhaustive()
    }
}
