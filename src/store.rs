/// Durable configuration store
///
/// Holds the small set of mutable settings that must survive restarts and be
/// re-read by every invocation: the cooldown marker and the rotated upstream
/// credentials. Backed by a Postgres key/value table, with an in-memory
/// implementation for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub const COOLDOWN_END_TIME: &str = "COOLDOWN_END_TIME";
pub const ACCESS_TOKEN: &str = "ACCESS_TOKEN";
pub const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
pub const USER_ID: &str = "USER_ID";
pub const TGTG_COOKIE: &str = "TGTG_COOKIE";
pub const LAST_TIME_TOKEN_REFRESHED: &str = "LAST_TIME_TOKEN_REFRESHED";
pub const NOTIFICATIONS_ENABLED: &str = "NOTIFICATIONS_ENABLED";

/// Persistence failure shared by the config store, the ledger and the timer
/// registry
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parse a stored timestamp. Accepts RFC 3339 and bare ISO 8601 (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Merge `values` into the stored configuration. Keys not named keep
    /// their current value.
    async fn set(&self, values: HashMap<String, String>) -> StoreResult<()>;

    async fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Create every table the service relies on
pub async fn init_schema(pool: &PgPool) -> StoreResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS function_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_notifications (
            store_id TEXT PRIMARY KEY,
            last_notification_date TIMESTAMPTZ NOT NULL,
            items_available INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS scheduled_invocations (
            id TEXT PRIMARY KEY,
            fire_at TIMESTAMPTZ NOT NULL,
            cron_expression TEXT NOT NULL,
            target TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    log::info!("Database schema ready");
    Ok(())
}

pub struct PgConfigStore {
    pool: PgPool,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM function_config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, values: HashMap<String, String>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in &values {
            sqlx::query(
                "INSERT INTO function_config (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log::debug!("Updated {} configuration keys", values.len());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM function_config WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-process configuration, optionally made to fail for error-path tests
#[derive(Default)]
pub struct MemoryConfigStore {
    values: RwLock<HashMap<String, String>>,
    fail_reads: RwLock<bool>,
    fail_writes: RwLock<bool>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(map),
            ..Self::default()
        }
    }

    pub async fn fail_reads(&self, fail: bool) {
        *self.fail_reads.write().await = fail;
    }

    pub async fn fail_writes(&self, fail: bool) {
        *self.fail_writes.write().await = fail;
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().await.clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        if *self.fail_reads.read().await {
            return Err(StoreError::Unavailable("configuration read refused".to_string()));
        }
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, values: HashMap<String, String>) -> StoreResult<()> {
        if *self.fail_writes.read().await {
            return Err(StoreError::Unavailable("configuration write refused".to_string()));
        }
        self.values.write().await.extend(values);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        if *self.fail_writes.read().await {
            return Err(StoreError::Unavailable("configuration write refused".to_string()));
        }
        self.values.write().await.remove(key);
        Ok(())
    }
}
