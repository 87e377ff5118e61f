/// Trigger registry
///
/// Registry of armed one-shot timers that invoke the monitoring entry point.
/// A timer's identity is the rule-name prefix followed by its UTC fire time
/// (`YYYYMMDDHHMM`), so the fire time can always be recovered from the id.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::store::{StoreError, StoreResult};

pub const RULE_NAME_PREFIX: &str = "TooGoodToGo_monitoring_invocation_rule_";

const RULE_TIME_FORMAT: &str = "%Y%m%d%H%M";

/// Entry point an armed timer invokes
pub const MONITORING_TARGET: &str = "monitoring";

/// A timer about to be registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledInvocation {
    pub id: String,
    pub fire_at: DateTime<Utc>,
    pub cron_expression: String,
}

impl ScheduledInvocation {
    /// Build the invocation for `fire_at`, truncated to the minute since
    /// that is the precision of both the identity and the cron expression.
    pub fn at(fire_at: DateTime<Utc>) -> Self {
        let fire_at = truncate_to_minute(fire_at);
        Self {
            id: rule_name(fire_at),
            fire_at,
            cron_expression: cron_expression(fire_at),
        }
    }
}

/// A timer as enumerated from the registry. `fire_at` is recovered from the
/// id and is `None` when the id does not carry a readable time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ArmedRun {
    pub id: String,
    pub fire_at: Option<DateTime<Utc>>,
}

impl ArmedRun {
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let fire_at = fire_time_from_rule_name(&id);
        Self { id, fire_at }
    }

    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.fire_at.map(|t| t > now).unwrap_or(false)
    }
}

pub fn rule_name(fire_at: DateTime<Utc>) -> String {
    format!("{}{}", RULE_NAME_PREFIX, fire_at.format(RULE_TIME_FORMAT))
}

/// Recover the fire time from the trailing `_`-separated segment of a rule name
pub fn fire_time_from_rule_name(name: &str) -> Option<DateTime<Utc>> {
    let suffix = name.rsplit('_').next()?;
    NaiveDateTime::parse_from_str(suffix, RULE_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Single-shot cron expression; the explicit year pins it to one occurrence.
pub fn cron_expression(dt: DateTime<Utc>) -> String {
    format!(
        "cron({} {} {} {} ? {})",
        dt.minute(),
        dt.hour(),
        dt.day(),
        dt.month(),
        dt.year()
    )
}

fn truncate_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

#[async_trait]
pub trait TriggerRegistry: Send + Sync {
    /// Every registered monitoring timer, past or future
    async fn list_armed(&self) -> StoreResult<Vec<ArmedRun>>;

    async fn arm(&self, invocation: &ScheduledInvocation) -> StoreResult<()>;

    async fn disarm(&self, id: &str) -> StoreResult<()>;
}

pub struct PgTriggerRegistry {
    pool: PgPool,
}

impl PgTriggerRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerRegistry for PgTriggerRegistry {
    async fn list_armed(&self) -> StoreResult<Vec<ArmedRun>> {
        let rows = sqlx::query(
            "SELECT id FROM scheduled_invocations WHERE id LIKE $1 ORDER BY fire_at",
        )
        .bind(format!("{}%", RULE_NAME_PREFIX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ArmedRun::from_id(row.get::<String, _>("id")))
            .collect())
    }

    async fn arm(&self, invocation: &ScheduledInvocation) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO scheduled_invocations (id, fire_at, cron_expression, target)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET fire_at = EXCLUDED.fire_at, cron_expression = EXCLUDED.cron_expression",
        )
        .bind(&invocation.id)
        .bind(invocation.fire_at)
        .bind(&invocation.cron_expression)
        .bind(MONITORING_TARGET)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn disarm(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM scheduled_invocations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-process registry preserving insertion order
#[derive(Default)]
pub struct MemoryTriggerRegistry {
    runs: RwLock<Vec<ScheduledInvocation>>,
    extra_ids: RwLock<Vec<String>>,
    fail_arm: RwLock<bool>,
    fail_disarm: RwLock<bool>,
}

impl MemoryTriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id directly, bypassing `ScheduledInvocation`, to model
    /// foreign or malformed rule names left in the registry.
    pub async fn insert_raw(&self, id: impl Into<String>) {
        self.extra_ids.write().await.push(id.into());
    }

    pub async fn fail_arm(&self, fail: bool) {
        *self.fail_arm.write().await = fail;
    }

    pub async fn fail_disarm(&self, fail: bool) {
        *self.fail_disarm.write().await = fail;
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().await.iter().map(|r| r.id.clone()).collect();
        ids.extend(self.extra_ids.read().await.iter().cloned());
        ids
    }
}

#[async_trait]
impl TriggerRegistry for MemoryTriggerRegistry {
    async fn list_armed(&self) -> StoreResult<Vec<ArmedRun>> {
        Ok(self
            .ids()
            .await
            .into_iter()
            .filter(|id| id.starts_with(RULE_NAME_PREFIX))
            .map(ArmedRun::from_id)
            .collect())
    }

    async fn arm(&self, invocation: &ScheduledInvocation) -> StoreResult<()> {
        if *self.fail_arm.read().await {
            return Err(StoreError::Unavailable("trigger registration refused".to_string()));
        }
        let mut runs = self.runs.write().await;
        runs.retain(|r| r.id != invocation.id);
        runs.push(invocation.clone());
        Ok(())
    }

    async fn disarm(&self, id: &str) -> StoreResult<()> {
        if *self.fail_disarm.read().await {
            return Err(StoreError::Unavailable("trigger removal refused".to_string()));
        }
        self.runs.write().await.retain(|r| r.id != id);
        self.extra_ids.write().await.retain(|x| x != id);
        Ok(())
    }
}
