//! Strongly-typed token hash.
//!
//! Using the newtype pattern, [`TokenHash`] prevents an unvalidated string
//! from reaching a storage tier: construction trims whitespace and rejects
//! blank input, so every downstream component can assume a usable key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a token identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid token hash: {detail}")]
pub struct InvalidTokenHash {
    /// Why the identifier was rejected.
    pub detail: String,
}

/// An opaque token identifier: the hex-encoded SHA-256 digest of a raw
/// bearer token, or any caller-supplied opaque id.
///
/// The raw token itself is never stored or logged; a `TokenHash` is safe
/// to include in structured log fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    /// Wrap an already-hashed (or otherwise opaque) token identifier.
    ///
    /// Trims surrounding whitespace. Returns [`InvalidTokenHash`] if the
    /// identifier is empty or blank.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidTokenHash> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(InvalidTokenHash {
                detail: "token id must not be empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Hash a raw bearer token into its opaque identifier.
    #[must_use]
    pub fn of_raw_token(raw_token: &str) -> Self {
        let digest = Sha256::digest(raw_token.as_bytes());
        Self(hex::encode(digest))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TokenHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TokenHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TokenHash {
    type Err = InvalidTokenHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
