//! Error types for blacklist operations.

use modelgate_core::InvalidTokenHash;
use thiserror::Error;

/// Errors returned by blacklist subsystem operations.
#[derive(Debug, Error)]
pub enum BlacklistError {
    /// Caller supplied an empty or otherwise unusable token id.
    #[error("Invalid token id: {0}")]
    InvalidTokenId(#[from] InvalidTokenHash),

    /// Caller supplied a TTL that would not place the expiry after the
    /// add timestamp.
    #[error("Invalid TTL: {detail}")]
    InvalidTtl { detail: String },

    /// The remote tier (primary/backup keyed store) is unreachable or
    /// timed out.
    #[error("Remote tier unavailable: {detail}")]
    RemoteUnavailable { detail: String },

    /// The durable system of record is unreachable.
    #[error("Durable store unavailable: {detail}")]
    DurableUnavailable { detail: String },

    /// No lifecycle record exists for the given token hash.
    #[error("Token record not found: {token_hash}")]
    RecordNotFound { token_hash: String },

    /// The requested status change leaves a terminal state.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Stored entry could not be serialized or deserialized.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (unknown backend, missing URL).
    #[error("Configuration error: {detail}")]
    Config { detail: String },
}

impl BlacklistError {
    /// True if this error indicates a storage tier is unreachable, as
    /// opposed to a caller mistake.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BlacklistError::RemoteUnavailable { .. } | BlacklistError::DurableUnavailable { .. }
        )
    }
}

impl From<redis::RedisError> for BlacklistError {
    fn from(e: redis::RedisError) -> Self {
        BlacklistError::RemoteUnavailable {
            detail: e.to_string(),
        }
    }
}

impl From<sqlx::Error> for BlacklistError {
    fn from(e: sqlx::Error) -> Self {
        BlacklistError::DurableUnavailable {
            detail: e.to_string(),
        }
    }
}
