//! Postgres-backed event store and dual-connection storage facade
//! (components C3 and C9).
//!
//! [`Storage`] owns the pooled connection path used for every query, insert,
//! bulk-copy, and transaction in this workspace. The separate direct
//! long-lived connection dedicated to the C7 notification subscription is
//! *not* owned here — `akashi-notify` opens its own `PgListener` against the
//! same URL, since reconnect/resubscribe bookkeeping is that component's
//! responsibility (specification §4.9) — but [`Storage::direct_connect_url`]
//! is the single place that URL is threaded through so callers never read it
//! out of the environment twice.

pub mod agents;
pub mod backfill;
pub mod conflicts;
pub mod decision_claims;
pub mod decisions;
pub mod events;
pub mod grants;
pub mod outbox;
pub mod retry;
pub mod runs;

use akashi_core::{Error, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub use retry::with_retry;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// The process-wide storage facade: a pooled connection plus the URL the
/// direct subscription connection should be opened against.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
    direct_connect_url: Option<String>,
}

impl Storage {
    /// Connect the pooled path. `direct_connect_url` is stored but not
    /// dialed here — per §4.9 the direct connection is optional, and when
    /// absent the broker disables itself while the rest of the service
    /// keeps running.
    pub async fn connect(pooled_url: &str, direct_connect_url: Option<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
            .connect(pooled_url)
            .await
            .map_err(|e| Error::Fatal(format!("failed to connect storage pool: {e}")))?;

        Ok(Self { pool, direct_connect_url })
    }

    /// Build a facade around an already-constructed pool, e.g. when the
    /// caller wants non-default `PgPoolOptions` or is wiring up tests
    /// against a pool created elsewhere.
    pub fn from_pool(pool: PgPool, direct_connect_url: Option<String>) -> Self {
        Self { pool, direct_connect_url }
    }

    /// The pooled connection, for callers composing their own queries
    /// outside the methods this crate already exposes.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The URL `akashi-notify` should dial for its direct subscription
    /// connection, if the deployment configured one.
    pub fn direct_connect_url(&self) -> Option<&str> {
        self.direct_connect_url.as_deref()
    }

    /// Lightweight connectivity probe, used at startup and by health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("select 1")
            .execute(&self.pool)
            .await
            .map_err(retry::map_sqlx_error)?;
        Ok(())
    }

    /// Release pooled connections. Part of the shutdown order documented in
    /// the root crate: broker close, buffer drain, storage close, WAL close.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("has_direct_connection", &self.direct_connect_url.is_some())
            .finish()
    }
}
