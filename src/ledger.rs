/// Notification ledger
///
/// Per-store record of the last time a notification went out. One record per
/// store, overwritten on every send and never deleted.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::store::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub store_id: String,
    pub last_notification_date: DateTime<Utc>,
    pub items_available: i32,
}

impl NotificationRecord {
    pub fn notified_on(&self, date: NaiveDate) -> bool {
        self.last_notification_date.date_naive() == date
    }
}

#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn query(&self, store_id: &str) -> StoreResult<Vec<NotificationRecord>>;

    async fn write(&self, record: &NotificationRecord) -> StoreResult<()>;
}

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for PgLedger {
    async fn query(&self, store_id: &str) -> StoreResult<Vec<NotificationRecord>> {
        let rows = sqlx::query(
            "SELECT store_id, last_notification_date, items_available
             FROM user_notifications WHERE store_id = $1",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        let records: Vec<NotificationRecord> = rows
            .iter()
            .map(|row| NotificationRecord {
                store_id: row.get("store_id"),
                last_notification_date: row.get("last_notification_date"),
                items_available: row.get("items_available"),
            })
            .collect();

        log::debug!("Retrieved {} ledger records for store {}", records.len(), store_id);
        Ok(records)
    }

    async fn write(&self, record: &NotificationRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_notifications (store_id, last_notification_date, items_available)
             VALUES ($1, $2, $3)
             ON CONFLICT (store_id) DO UPDATE
             SET last_notification_date = EXCLUDED.last_notification_date,
                 items_available = EXCLUDED.items_available",
        )
        .bind(&record.store_id)
        .bind(record.last_notification_date)
        .bind(record.items_available)
        .execute(&self.pool)
        .await?;

        log::info!(
            "Recorded notification for store {} ({} items)",
            record.store_id,
            record.items_available
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<String, NotificationRecord>>,
    failing_stores: RwLock<Vec<String>>,
    fail_writes: RwLock<bool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make lookups for `store_id` fail
    pub async fn fail_queries_for(&self, store_id: impl Into<String>) {
        self.failing_stores.write().await.push(store_id.into());
    }

    pub async fn fail_writes(&self, fail: bool) {
        *self.fail_writes.write().await = fail;
    }

    pub async fn record(&self, store_id: &str) -> Option<NotificationRecord> {
        self.records.read().await.get(store_id).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl NotificationLedger for MemoryLedger {
    async fn query(&self, store_id: &str) -> StoreResult<Vec<NotificationRecord>> {
        if self.failing_stores.read().await.iter().any(|s| s == store_id) {
            return Err(StoreError::Unavailable(format!("ledger lookup for {} refused", store_id)));
        }
        Ok(self.records.read().await.get(store_id).cloned().into_iter().collect())
    }

    async fn write(&self, record: &NotificationRecord) -> StoreResult<()> {
        if *self.fail_writes.read().await {
            return Err(StoreError::Unavailable("ledger write refused".to_string()));
        }
        self.records
            .write()
            .await
            .insert(record.store_id.clone(), record.clone());
        Ok(())
    }
}
