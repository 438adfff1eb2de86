//! Tiered revoked-token blacklist.
//!
//! Revocations land in three tiers: a bounded in-process cache answering
//! the hot path, a shared remote store (Redis or in-memory) with
//! primary/backup keys and a day-bucketed expiry index, and a durable
//! system of record (Postgres or in-memory) that survives restarts.
//! Background tasks sweep expired state, repair drift between tiers, and
//! rewarm the caches after a restart.
//!
//! # Example
//!
//! ```no_run
//! use modelgate_blacklist::{build_runtime, BlacklistConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), modelgate_blacklist::BlacklistError> {
//! let runtime = build_runtime(&BlacklistConfig::from_env()?).await?;
//! runtime.sync.perform_startup_recovery().await?;
//! runtime.cleanup.start().await;
//!
//! runtime
//!     .engine
//!     .add_to_blacklist("token-id", Duration::from_secs(3600), Some("logout"), None)
//!     .await?;
//! assert!(runtime.engine.is_blacklisted("token-id").await?);
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod lifecycle;
pub mod local_cache;
pub mod stats;
pub mod store;
pub mod sync;
pub mod tier;

use std::sync::Arc;

pub use cleanup::CleanupScheduler;
pub use config::{BlacklistConfig, DurableBackend, FailurePolicy, RemoteBackend};
pub use engine::BlacklistEngine;
pub use entry::{BlacklistEntry, TokenLifecycleRecord, TokenStatus};
pub use error::BlacklistError;
pub use lifecycle::{LifecycleStats, TokenLifecycleManager};
pub use local_cache::LocalCache;
pub use modelgate_core::{InvalidTokenHash, TokenHash};
pub use stats::{CacheStatsSnapshot, SyncStatsSnapshot};
pub use store::{DurableStore, RemoteStore};
pub use sync::{ConsistencyCheckResult, SyncEngine, SyncResult, SyncScheduler};
pub use tier::RemoteTier;

use crate::store::memory::{MemoryDurableStore, MemoryRemoteStore};
use crate::store::postgres::PgDurableStore;
use crate::store::redis::RedisRemoteStore;

/// The wired-up blacklist subsystem.
///
/// Callers own startup sequencing: run
/// [`SyncEngine::perform_startup_recovery`] before serving traffic, then
/// start the schedulers.
pub struct BlacklistRuntime {
    pub engine: Arc<BlacklistEngine>,
    pub lifecycle: Arc<TokenLifecycleManager>,
    pub sync: Arc<SyncEngine>,
    pub cleanup: CleanupScheduler,
    pub sync_scheduler: SyncScheduler,
}

/// Build the subsystem from configuration, connecting to the configured
/// backends.
pub async fn build_runtime(config: &BlacklistConfig) -> Result<BlacklistRuntime, BlacklistError> {
    let remote: Arc<dyn RemoteStore> = match &config.remote_backend {
        RemoteBackend::Memory => Arc::new(MemoryRemoteStore::new()),
        RemoteBackend::Redis { url } => Arc::new(RedisRemoteStore::connect(url).await?),
    };

    let durable: Arc<dyn DurableStore> = match &config.durable_backend {
        DurableBackend::Memory => Arc::new(MemoryDurableStore::new()),
        DurableBackend::Postgres { url } => {
            let pool = sqlx::postgres::PgPoolOptions::new().connect(url).await?;
            Arc::new(PgDurableStore::new(pool))
        }
    };

    Ok(assemble(config, remote, durable))
}

/// Wire the subsystem around caller-supplied stores. Used by tests and by
/// hosts that manage their own connection pools.
#[must_use]
pub fn assemble(
    config: &BlacklistConfig,
    remote: Arc<dyn RemoteStore>,
    durable: Arc<dyn DurableStore>,
) -> BlacklistRuntime {
    let local = Arc::new(LocalCache::with_capacity(config.max_local_entries));

    let tier = Arc::new(
        RemoteTier::new(remote, Arc::clone(&local))
            .with_op_timeout(config.remote_timeout)
            .with_backup_grace(config.backup_grace)
            .with_cache_fill_ttl(config.cache_fill_ttl)
            .with_index_probe_days(config.index_probe_days),
    );

    let engine = Arc::new(BlacklistEngine::new(
        Arc::clone(&local),
        Arc::clone(&tier),
        Arc::clone(&durable),
        config.failure_policy,
    ));

    let lifecycle = Arc::new(TokenLifecycleManager::new(
        Arc::clone(&durable),
        Arc::clone(&engine),
    ));

    let sync = Arc::new(SyncEngine::new(
        Arc::clone(&tier),
        Arc::clone(&durable),
        Arc::clone(&local),
        engine.ready_flag(),
    ));

    let cleanup = CleanupScheduler::new(
        local,
        tier,
        durable,
        config.cleanup_interval,
    )
    .with_lifecycle(Arc::clone(&lifecycle));

    let sync_scheduler = SyncScheduler::new(Arc::clone(&sync), config.sync_interval);

    BlacklistRuntime {
        engine,
        lifecycle,
        sync,
        cleanup,
        sync_scheduler,
    }
}
