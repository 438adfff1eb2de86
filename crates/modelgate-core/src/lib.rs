//! Shared core types for the modelgate gateway.
//!
//! This crate provides the strongly-typed token identifier used across the
//! blacklist subsystem. Raw bearer tokens never cross a module boundary:
//! every component works with a [`TokenHash`], the SHA-256 digest of the
//! raw token.
//!
//! # Example
//!
//! ```
//! use modelgate_core::TokenHash;
//!
//! // Hash a raw token at the trust boundary.
//! let hash = TokenHash::of_raw_token("eyJhbGciOi...");
//!
//! // Or wrap an already-hashed identifier received from a caller.
//! let hash = TokenHash::new("a1b2c3").unwrap();
//! assert_eq!(hash.as_str(), "a1b2c3");
//! ```

mod hash;

pub use hash::{InvalidTokenHash, TokenHash};
