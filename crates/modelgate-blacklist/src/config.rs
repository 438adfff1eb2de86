//! Blacklist subsystem configuration.
//!
//! Loaded from `MODELGATE_BLACKLIST_*` environment variables at startup;
//! every knob has a production default so an empty environment yields a
//! working single-node (in-memory) setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BlacklistError;
use crate::local_cache::DEFAULT_MAX_ENTRIES;
use crate::tier::{
    DEFAULT_BACKUP_GRACE, DEFAULT_CACHE_FILL_TTL, DEFAULT_INDEX_PROBE_DAYS, DEFAULT_OP_TIMEOUT,
};

/// How `is_blacklisted` answers when every tier that could hold the token
/// is unreachable.
///
/// Fail-open favors availability: an unknown token is treated as not
/// revoked, so a storage outage cannot take down all token validation.
/// Fail-closed favors strictness for deployments that would rather reject
/// traffic than honor a possibly-revoked token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailOpen,
    FailClosed,
}

impl FailurePolicy {
    /// Parse from a config string (case-insensitive).
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fail_open" | "fail-open" | "open" => Some(FailurePolicy::FailOpen),
            "fail_closed" | "fail-closed" | "closed" => Some(FailurePolicy::FailClosed),
            _ => None,
        }
    }
}

/// Which backend serves the shared remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBackend {
    /// In-process maps; for single-node deployments and tests.
    Memory,
    Redis {
        url: String,
    },
}

/// Which backend serves as the durable system of record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableBackend {
    /// In-process maps; for single-node deployments and tests.
    Memory,
    Postgres {
        url: String,
    },
}

/// Complete configuration for the blacklist subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistConfig {
    pub remote_backend: RemoteBackend,
    pub durable_backend: DurableBackend,
    pub failure_policy: FailurePolicy,
    /// Local cache entry bound.
    pub max_local_entries: usize,
    /// How often the cleanup scheduler runs.
    pub cleanup_interval: Duration,
    /// How often the background sync runs.
    pub sync_interval: Duration,
    /// Bound on any single remote operation.
    pub remote_timeout: Duration,
    /// Extra TTL on backup keys beyond the primary's.
    pub backup_grace: Duration,
    /// Days probed forward when removing an expiry-index entry.
    pub index_probe_days: u64,
    /// Cap on the TTL of entries cache-filled into the local tier.
    pub cache_fill_ttl: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            remote_backend: RemoteBackend::Memory,
            durable_backend: DurableBackend::Memory,
            failure_policy: FailurePolicy::default(),
            max_local_entries: DEFAULT_MAX_ENTRIES,
            cleanup_interval: Duration::from_secs(300),
            sync_interval: Duration::from_secs(3600),
            remote_timeout: DEFAULT_OP_TIMEOUT,
            backup_grace: DEFAULT_BACKUP_GRACE,
            index_probe_days: DEFAULT_INDEX_PROBE_DAYS,
            cache_fill_ttl: DEFAULT_CACHE_FILL_TTL,
        }
    }
}

impl BlacklistConfig {
    /// Load configuration from `MODELGATE_BLACKLIST_*` environment
    /// variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, BlacklistError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BlacklistError> {
        let mut config = Self::default();

        match lookup("MODELGATE_BLACKLIST_REMOTE_BACKEND").as_deref() {
            None | Some("memory") => {}
            Some("redis") => {
                let url = lookup("MODELGATE_BLACKLIST_REDIS_URL").ok_or_else(|| {
                    BlacklistError::Config {
                        detail: "remote backend is redis but MODELGATE_BLACKLIST_REDIS_URL is unset"
                            .to_string(),
                    }
                })?;
                config.remote_backend = RemoteBackend::Redis { url };
            }
            Some(other) => {
                return Err(BlacklistError::Config {
                    detail: format!("unknown remote backend: {other}"),
                });
            }
        }

        match lookup("MODELGATE_BLACKLIST_DURABLE_BACKEND").as_deref() {
            None | Some("memory") => {}
            Some("postgres") => {
                let url = lookup("MODELGATE_BLACKLIST_DATABASE_URL").ok_or_else(|| {
                    BlacklistError::Config {
                        detail:
                            "durable backend is postgres but MODELGATE_BLACKLIST_DATABASE_URL is unset"
                                .to_string(),
                    }
                })?;
                config.durable_backend = DurableBackend::Postgres { url };
            }
            Some(other) => {
                return Err(BlacklistError::Config {
                    detail: format!("unknown durable backend: {other}"),
                });
            }
        }

        if let Some(value) = lookup("MODELGATE_BLACKLIST_FAILURE_POLICY") {
            config.failure_policy =
                FailurePolicy::from_str_value(&value).ok_or_else(|| BlacklistError::Config {
                    detail: format!("unknown failure policy: {value}"),
                })?;
        }

        if let Some(value) = lookup("MODELGATE_BLACKLIST_MAX_LOCAL_ENTRIES") {
            config.max_local_entries = parse(&value, "MODELGATE_BLACKLIST_MAX_LOCAL_ENTRIES")?;
        }
        if let Some(value) = lookup("MODELGATE_BLACKLIST_CLEANUP_INTERVAL_SECS") {
            config.cleanup_interval =
                Duration::from_secs(parse(&value, "MODELGATE_BLACKLIST_CLEANUP_INTERVAL_SECS")?);
        }
        if let Some(value) = lookup("MODELGATE_BLACKLIST_SYNC_INTERVAL_SECS") {
            config.sync_interval =
                Duration::from_secs(parse(&value, "MODELGATE_BLACKLIST_SYNC_INTERVAL_SECS")?);
        }
        if let Some(value) = lookup("MODELGATE_BLACKLIST_REMOTE_TIMEOUT_MS") {
            config.remote_timeout =
                Duration::from_millis(parse(&value, "MODELGATE_BLACKLIST_REMOTE_TIMEOUT_MS")?);
        }
        if let Some(value) = lookup("MODELGATE_BLACKLIST_BACKUP_GRACE_SECS") {
            config.backup_grace =
                Duration::from_secs(parse(&value, "MODELGATE_BLACKLIST_BACKUP_GRACE_SECS")?);
        }
        if let Some(value) = lookup("MODELGATE_BLACKLIST_INDEX_PROBE_DAYS") {
            config.index_probe_days = parse(&value, "MODELGATE_BLACKLIST_INDEX_PROBE_DAYS")?;
        }
        if let Some(value) = lookup("MODELGATE_BLACKLIST_CACHE_FILL_TTL_SECS") {
            config.cache_fill_ttl =
                Duration::from_secs(parse(&value, "MODELGATE_BLACKLIST_CACHE_FILL_TTL_SECS")?);
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, BlacklistError> {
    value.parse().map_err(|_| BlacklistError::Config {
        detail: format!("invalid value for {name}: {value}"),
    })
}
