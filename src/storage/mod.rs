//! SQLite-backed cache of computed analyses.
//!
//! Entries are keyed on `(chain, address, range, snapshot)`, where the
//! snapshot is the cache window the upstream events were fetched in.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::{Address, Chain, RangeKey};

pub type DbPool = SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub chain: Chain,
    pub address: Address,
    pub range: RangeKey,
    pub snapshot: i64,
}

impl CacheKey {
    pub fn new(chain: Chain, address: Address, range: RangeKey, now: i64, ttl_secs: u64) -> Self {
        let ttl = i64::try_from(ttl_secs.max(1)).unwrap_or(i64::MAX);
        Self {
            chain,
            address,
            range,
            snapshot: now.div_euclid(ttl),
        }
    }
}

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    ensure_dir_exists(database_url)?;

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL {}", database_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to SQLite")?;

    apply_schema(&pool).await?;
    Ok(pool)
}

fn ensure_dir_exists(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating db directory {:?}", dir))?;
            }
        }
    }
    Ok(())
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_cache (
            chain TEXT NOT NULL,
            address TEXT NOT NULL,
            range_key TEXT NOT NULL,
            snapshot INTEGER NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (chain, address, range_key, snapshot)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_analysis_cache_snapshot ON analysis_cache(snapshot);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn get_cached(pool: &SqlitePool, key: &CacheKey) -> Result<Option<String>> {
    let payload: Option<String> = sqlx::query_scalar(
        r#"
        SELECT payload
        FROM analysis_cache
        WHERE chain = ?1 AND address = ?2 AND range_key = ?3 AND snapshot = ?4;
        "#,
    )
    .bind(key.chain.as_str())
    .bind(key.address.as_str())
    .bind(key.range.as_str())
    .bind(key.snapshot)
    .fetch_optional(pool)
    .await?;
    Ok(payload)
}

/// Stores `payload` for `key` and drops entries from earlier snapshots.
pub async fn put_cached(pool: &SqlitePool, key: &CacheKey, payload: &str, now: i64) -> Result<()> {
    let mut txn = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO analysis_cache (chain, address, range_key, snapshot, payload, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(chain, address, range_key, snapshot)
        DO UPDATE SET payload = excluded.payload, created_at = excluded.created_at;
        "#,
    )
    .bind(key.chain.as_str())
    .bind(key.address.as_str())
    .bind(key.range.as_str())
    .bind(key.snapshot)
    .bind(payload)
    .bind(now)
    .execute(&mut *txn)
    .await?;

    let pruned = sqlx::query("DELETE FROM analysis_cache WHERE snapshot < ?1;")
        .bind(key.snapshot)
        .execute(&mut *txn)
        .await?
        .rows_affected();

    txn.commit().await?;
    if pruned > 0 {
        tracing::debug!("pruned {} stale cache rows", pruned);
    }
    Ok(())
}

/// Per-key async locks so that only one computation runs for a cache key at
/// a time; later callers wait and then read the stored result.
#[derive(Clone, Default)]
pub struct SingleFlight {
    locks: Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>,
}

impl SingleFlight {
    pub async fn acquire(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only referenced by the map are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn in_flight(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
