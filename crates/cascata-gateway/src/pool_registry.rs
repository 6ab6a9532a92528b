//! The adaptive connection pool registry (§4.2).
//!
//! A process-wide cache of per-tenant (and per-route) database pools with LRU-by-last-access
//! eviction and idle reaping. Reads (`get`) are the hot path; writes (insert/evict) are rare, so
//! the map lives behind a `tokio::sync::RwLock` and each entry tracks its own last-accessed
//! timestamp in an `AtomicI64` so a `get` only needs the read lock even on a cache hit. A caller
//! that has already looked up a handle keeps it alive via `Arc`/`sqlx::PgPool`'s own internal
//! `Arc` even if the reaper removes the map entry out from under it — removal only stops *new*
//! acquisitions from reusing the pool, it does not invalidate connections already checked out.

use cascata_core::project::PoolSelector;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Executor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const MAX_ACTIVE_POOLS_DEFAULT: usize = 500;
const IDLE_REAP_AFTER: Duration = Duration::from_secs(300);
const REAP_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 15_000;

#[derive(Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub statement_timeout_ms: u64,
    pub external: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            statement_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            external: false,
        }
    }
}

struct PoolEntry {
    pool: sqlx::PgPool,
    last_accessed_unix_ms: AtomicI64,
    max_connections: u32,
    external: bool,
}

/// A handle to a live pool. Cloning is cheap (it clones the underlying `sqlx::PgPool`, itself
/// reference-counted); holding one keeps the connections usable even across a reaper sweep.
#[derive(Clone)]
pub struct PoolHandle {
    pub pool: sqlx::PgPool,
}

pub struct PoolRegistry {
    entries: RwLock<HashMap<String, Arc<PoolEntry>>>,
    max_active_pools: usize,
}

impl PoolRegistry {
    pub fn new(max_active_pools: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            max_active_pools,
        })
    }

    /// Acquires (constructing on first use) the pool for the given selector.
    pub async fn get(
        &self,
        selector: &PoolSelector,
        config: PoolConfig,
        connect_url: &str,
    ) -> anyhow::Result<PoolHandle> {
        let key = selector.cache_key();

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                entry
                    .last_accessed_unix_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                return Ok(PoolHandle {
                    pool: entry.pool.clone(),
                });
            }
        }

        // Construction happens under the write lock so only one acquirer builds a given key;
        // a failure here must not leave a half-initialised entry, which falls out naturally
        // since we only insert after `PgPoolOptions::connect` succeeds.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&key) {
            entry
                .last_accessed_unix_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
            return Ok(PoolHandle {
                pool: entry.pool.clone(),
            });
        }

        let statement_timeout_ms = config.statement_timeout_ms;
        let accept_invalid_certs = config.external;
        let mut connect_options: PgConnectOptions = connect_url.parse()?;
        if accept_invalid_certs {
            // External/ejected projects manage their own databases; permissive trust is
            // deliberate (§4.2 "Per-connection hardening").
            connect_options = connect_options.ssl_mode(sqlx::postgres::PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET statement_timeout = {statement_timeout_ms}").as_str())
                        .await?;
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await?;

        let entry = Arc::new(PoolEntry {
            pool: pool.clone(),
            last_accessed_unix_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            max_connections: config.max_connections,
            external: config.external,
        });
        entries.insert(key, entry);

        enforce_hard_cap(&mut entries, self.max_active_pools);

        Ok(PoolHandle { pool })
    }

    /// Closes every variant whose key contains `db_identifier` (tenant updated/deleted).
    pub async fn close(&self, db_identifier: &str) {
        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .keys()
            .filter(|k| k.contains(db_identifier))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(entry) = entries.remove(&key) {
                entry.pool.close().await;
            }
        }
    }

    /// Drains every pool on graceful shutdown.
    pub async fn close_all(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            entry.pool.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Closes any entry untouched for longer than the idle threshold (§4.2 "Idle reap").
    pub async fn reap_idle(&self) {
        let threshold = Utc::now().timestamp_millis() - IDLE_REAP_AFTER.as_millis() as i64;
        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.last_accessed_unix_ms.load(Ordering::Relaxed) < threshold)
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            if let Some(entry) = entries.remove(&key) {
                tracing::info!(event = "gateway.pool.idle_reaped", key = %key, "closed idle pool");
                entry.pool.close().await;
            }
        }
    }

    /// Runs the idle reaper on a 30 s tick until `shutdown` fires.
    pub async fn run_reaper(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.reap_idle().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// When the live set exceeds the hard cap, evict the oldest by last-accessed until at/under it
/// (§4.2 "Hard cap"). Closing happens fire-and-forget since we're already holding the write lock
/// and `PgPool::close` only needs a clone.
fn enforce_hard_cap(entries: &mut HashMap<String, Arc<PoolEntry>>, max_active_pools: usize) {
    while entries.len() > max_active_pools {
        let oldest_key = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_unix_ms.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone());
        let Some(oldest_key) = oldest_key else {
            break;
        };
        if let Some(entry) = entries.remove(&oldest_key) {
            tracing::info!(event = "gateway.pool.hard_cap_evicted", key = %oldest_key, "evicted pool at hard cap");
            let pool = entry.pool.clone();
            tokio::spawn(async move {
                pool.close().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults_match_spec() {
        let config = PoolConfig::default();
        assert_eq!(config.statement_timeout_ms, 15_000);
        assert!(!config.external);
    }

    #[test]
    fn max_active_pools_default_is_five_hundred() {
        assert_eq!(MAX_ACTIVE_POOLS_DEFAULT, 500);
    }
}
