//! Blacklist entry and token lifecycle data model.
//!
//! A [`BlacklistEntry`] marks a token as invalid before its natural expiry.
//! Expiry is evaluated lazily: an entry whose `expires_at` has passed is
//! logically absent on every query path, whether or not a cleanup sweep
//! has physically removed it yet.

use chrono::{DateTime, NaiveDate, Utc};
use modelgate_core::TokenHash;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A record marking a token identifier as revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// Opaque token identifier (hash of the raw token, never the token).
    pub token_hash: TokenHash,

    /// The user the token belonged to, if known.
    pub user_id: Option<String>,

    /// Human-readable revocation reason.
    pub reason: String,

    /// Actor that added the entry.
    pub added_by: String,

    /// When the entry was added.
    pub added_at: DateTime<Utc>,

    /// When the entry logically disappears. Always after `added_at`.
    pub expires_at: DateTime<Utc>,
}

impl BlacklistEntry {
    /// Create an entry expiring `ttl` from now.
    ///
    /// `reason` defaults to "revoked" and `added_by` to "system" when not
    /// supplied, matching what the revocation endpoint sends for
    /// unattended revocations.
    #[must_use]
    pub fn new(
        token_hash: TokenHash,
        ttl: Duration,
        reason: Option<&str>,
        added_by: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_hash,
            user_id: None,
            reason: reason.unwrap_or("revoked").to_string(),
            added_by: added_by.unwrap_or("system").to_string(),
            added_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Attach the owning user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// True once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Remaining time until expiry, or `None` if already expired.
    #[must_use]
    pub fn remaining_ttl(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok()
    }

    /// The calendar date this entry's expiry falls on. Every live entry
    /// belongs to exactly one expiry-index bucket, keyed by this date.
    #[must_use]
    pub fn expiry_bucket(&self) -> NaiveDate {
        self.expires_at.date_naive()
    }
}

/// Lifecycle status of a token.
///
/// `Revoked` and `Expired` are terminal. A revoked token is never moved to
/// `Expired` by the expiry sweep, so the revocation stays visible in the
/// record for audit purposes; validity checks treat both states as
/// invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Active,
    Revoked,
    Expired,
}

impl TokenStatus {
    /// Status name as stored in the durable table.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "ACTIVE",
            TokenStatus::Revoked => "REVOKED",
            TokenStatus::Expired => "EXPIRED",
        }
    }

    /// Parse from the stored name (case-insensitive).
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(TokenStatus::Active),
            "REVOKED" => Some(TokenStatus::Revoked),
            "EXPIRED" => Some(TokenStatus::Expired),
            _ => None,
        }
    }

    /// True for states that cannot be left.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TokenStatus::Revoked | TokenStatus::Expired)
    }

    /// Whether a transition to `next` is legal. Transitions to the current
    /// status are no-ops and always allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: TokenStatus) -> bool {
        *self == next || !self.is_terminal()
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full lifecycle record for a token, kept in the durable store.
///
/// Records exist for every issued token, not only blacklisted ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLifecycleRecord {
    /// Record id.
    pub id: Uuid,

    /// Opaque token identifier.
    pub token_hash: TokenHash,

    /// The owning user, if known.
    pub user_id: Option<String>,

    /// Current lifecycle status.
    pub status: TokenStatus,

    /// When the token was issued.
    pub issued_at: DateTime<Utc>,

    /// When the token naturally expires.
    pub expires_at: DateTime<Utc>,

    /// When the status last changed.
    pub last_status_change: DateTime<Utc>,

    /// Reason given for the last status change.
    pub last_change_reason: Option<String>,

    /// Actor of the last status change.
    pub last_changed_by: Option<String>,

    /// Open key/value metadata. Status changes append to the
    /// `status_history` array inside this map.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TokenLifecycleRecord {
    /// Create a new `ACTIVE` record at issuance time.
    #[must_use]
    pub fn new(
        token_hash: TokenHash,
        user_id: Option<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_hash,
            user_id,
            status: TokenStatus::Active,
            issued_at,
            expires_at,
            last_status_change: issued_at,
            last_change_reason: None,
            last_changed_by: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// True while the token is `Active` and not yet past its expiry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == TokenStatus::Active && self.expires_at > Utc::now()
    }

    /// True once the natural expiry instant has passed, regardless of
    /// status.
    #[must_use]
    pub fn is_past_expiry(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Apply a status change, recording who/why and appending to the
    /// status history in the metadata map.
    ///
    /// Callers validate the transition first; this method only mutates.
    pub fn apply_status(&mut self, new_status: TokenStatus, reason: &str, changed_by: &str) {
        let now = Utc::now();
        let change = serde_json::json!({
            "old_status": self.status.as_str(),
            "new_status": new_status.as_str(),
            "reason": reason,
            "changed_by": changed_by,
            "timestamp": now.to_rfc3339(),
        });

        let history = self
            .metadata
            .entry("status_history".to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let Some(arr) = history.as_array_mut() {
            arr.push(change);
        }

        self.status = new_status;
        self.last_status_change = now;
        self.last_change_reason = Some(reason.to_string());
        self.last_changed_by = Some(changed_by.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> TokenHash {
        TokenHash::new(s).unwrap()
    }

    #[test]
    fn test_entry_expires_after_added() {
        let entry = BlacklistEntry::new(hash("t1"), Duration::from_secs(60), None, None);
        assert!(entry.expires_at > entry.added_at);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_defaults() {
        let entry = BlacklistEntry::new(hash("t1"), Duration::from_secs(60), None, None);
        assert_eq!(entry.reason, "revoked");
        assert_eq!(entry.added_by, "system");
        assert!(entry.user_id.is_none());
    }

    #[test]
    fn test_entry_lazy_expiry() {
        let mut entry = BlacklistEntry::new(hash("t1"), Duration::from_secs(60), None, None);
        entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(entry.is_expired());
        assert!(entry.remaining_ttl().is_none());
    }

    #[test]
    fn test_entry_expiry_bucket_matches_expiry_date() {
        let entry = BlacklistEntry::new(hash("t1"), Duration::from_secs(3600), None, None);
        assert_eq!(entry.expiry_bucket(), entry.expires_at.date_naive());
    }

    #[test]
    fn test_entry_json_round_trip() {
        let entry = BlacklistEntry::new(
            hash("t1"),
            Duration::from_secs(60),
            Some("compromised"),
            Some("admin"),
        )
        .with_user_id("u-42");
        let json = serde_json::to_string(&entry).unwrap();
        let back: BlacklistEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_status_transitions() {
        assert!(TokenStatus::Active.can_transition_to(TokenStatus::Revoked));
        assert!(TokenStatus::Active.can_transition_to(TokenStatus::Expired));
        assert!(TokenStatus::Active.can_transition_to(TokenStatus::Active));

        // Terminal states allow only no-op transitions.
        assert!(TokenStatus::Revoked.can_transition_to(TokenStatus::Revoked));
        assert!(!TokenStatus::Revoked.can_transition_to(TokenStatus::Expired));
        assert!(!TokenStatus::Revoked.can_transition_to(TokenStatus::Active));
        assert!(!TokenStatus::Expired.can_transition_to(TokenStatus::Revoked));
        assert!(!TokenStatus::Expired.can_transition_to(TokenStatus::Active));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            TokenStatus::from_str_value("revoked"),
            Some(TokenStatus::Revoked)
        );
        assert_eq!(TokenStatus::from_str_value("bogus"), None);
    }

    #[test]
    fn test_record_starts_active() {
        let now = Utc::now();
        let record = TokenLifecycleRecord::new(
            hash("t1"),
            Some("u-1".to_string()),
            now,
            now + chrono::Duration::hours(1),
        );
        assert_eq!(record.status, TokenStatus::Active);
        assert!(record.is_valid());
    }

    #[test]
    fn test_record_apply_status_appends_history() {
        let now = Utc::now();
        let mut record =
            TokenLifecycleRecord::new(hash("t1"), None, now, now + chrono::Duration::hours(1));

        record.apply_status(TokenStatus::Revoked, "compromised", "admin");
        assert_eq!(record.status, TokenStatus::Revoked);
        assert_eq!(record.last_change_reason.as_deref(), Some("compromised"));
        assert_eq!(record.last_changed_by.as_deref(), Some("admin"));

        let history = record.metadata["status_history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["old_status"], "ACTIVE");
        assert_eq!(history[0]["new_status"], "REVOKED");
    }

    #[test]
    fn test_revoked_record_is_invalid() {
        let now = Utc::now();
        let mut record =
            TokenLifecycleRecord::new(hash("t1"), None, now, now + chrono::Duration::hours(1));
        record.apply_status(TokenStatus::Revoked, "logout", "u-1");
        assert!(!record.is_valid());
        assert!(!record.is_past_expiry());
    }
}
