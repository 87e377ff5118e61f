/// Cooldown Module
///
/// Anti-bot circuit breaker. When the upstream API flags automated access,
/// monitoring is suspended until a persisted instant; every monitoring pass and
/// every scheduler tick consults it first.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::store::{parse_timestamp, ConfigStore, StoreError, COOLDOWN_END_TIME};

pub const DEFAULT_COOLDOWN_MINUTES: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum CooldownError {
    #[error("cooldown duration must be positive")]
    InvalidDuration,

    #[error("failed to persist cooldown marker: {0}")]
    Persistence(#[from] StoreError),
}

/// Result of a cooldown lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownState {
    Inactive,
    Suspended {
        until: DateTime<Utc>,
        remaining: Duration,
    },
}

impl CooldownState {
    pub fn is_suspended(&self) -> bool {
        matches!(self, CooldownState::Suspended { .. })
    }

    pub fn remaining_seconds(&self) -> Option<i64> {
        match self {
            CooldownState::Inactive => None,
            CooldownState::Suspended { remaining, .. } => Some(remaining.num_seconds()),
        }
    }
}

pub struct CooldownController {
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
}

impl CooldownController {
    pub fn new(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Read the suspend-until marker against the current time.
    ///
    /// Read failures and malformed markers fail open: the system is reported
    /// as not suspended rather than wedged. Expired markers are left in place.
    pub async fn is_suspended(&self) -> CooldownState {
        let raw = match self.store.get(COOLDOWN_END_TIME).await {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => {
                log::debug!("No cooldown end time set, cooldown is not active");
                return CooldownState::Inactive;
            }
            Err(e) => {
                log::error!("Failed to read cooldown state, assuming inactive: {}", e);
                return CooldownState::Inactive;
            }
        };

        let until = match parse_timestamp(&raw) {
            Some(until) => until,
            None => {
                log::error!("Ignoring malformed cooldown end time '{}'", raw);
                return CooldownState::Inactive;
            }
        };

        let now = self.clock.now_utc();
        if now < until {
            let remaining = until - now;
            log::info!(
                "Cooldown is active until {} ({} seconds remaining)",
                until,
                remaining.num_seconds()
            );
            CooldownState::Suspended { until, remaining }
        } else {
            log::debug!("Cooldown period expired at {}", until);
            CooldownState::Inactive
        }
    }

    /// Suspend monitoring for `duration_minutes` from now, replacing any
    /// earlier marker.
    pub async fn activate(&self, duration_minutes: u32) -> Result<DateTime<Utc>, CooldownError> {
        if duration_minutes == 0 {
            return Err(CooldownError::InvalidDuration);
        }

        let until = self.clock.now_utc() + Duration::minutes(i64::from(duration_minutes));

        let mut values = HashMap::new();
        values.insert(COOLDOWN_END_TIME.to_string(), until.to_rfc3339());
        self.store.set(values).await?;

        log::warn!(
            "Cooldown activated for {} minutes, monitoring suspended until {}",
            duration_minutes,
            until
        );
        Ok(until)
    }

    /// Lift the suspension immediately
    pub async fn clear(&self) -> Result<(), CooldownError> {
        self.store.remove(COOLDOWN_END_TIME).await?;
        log::info!("Cooldown cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryConfigStore;
    use chrono::TimeZone;

    fn setup() -> (Arc<MemoryConfigStore>, Arc<FixedClock>, CooldownController) {
        let store = Arc::new(MemoryConfigStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 20, 14, 0, 0).unwrap(),
        ));
        let controller = CooldownController::new(store.clone(), clock.clone());
        (store, clock, controller)
    }

    #[tokio::test]
    async fn inactive_without_marker() {
        let (_, _, controller) = setup();
        let state = controller.is_suspended().await;
        assert_eq!(state, CooldownState::Inactive);
        assert_eq!(state.remaining_seconds(), None);
    }

    #[tokio::test]
    async fn activation_suspends_for_the_full_duration() {
        let (_, _, controller) = setup();
        controller.activate(30).await.unwrap();

        let state = controller.is_suspended().await;
        assert!(state.is_suspended());
        assert_eq!(state.remaining_seconds(), Some(30 * 60));
    }

    #[tokio::test]
    async fn expires_after_the_window() {
        let (_, clock, controller) = setup();
        controller.activate(30).await.unwrap();

        clock.advance(Duration::minutes(29));
        let state = controller.is_suspended().await;
        assert!(state.is_suspended());
        assert_eq!(state.remaining_seconds(), Some(60));

        clock.advance(Duration::minutes(2));
        assert_eq!(controller.is_suspended().await, CooldownState::Inactive);
    }

    #[tokio::test]
    async fn expiry_is_exact_at_the_boundary() {
        let (_, clock, controller) = setup();
        controller.activate(5).await.unwrap();
        clock.advance(Duration::minutes(5));
        assert!(!controller.is_suspended().await.is_suspended());
    }

    #[tokio::test]
    async fn reactivation_overwrites_instead_of_stacking() {
        let (_, clock, controller) = setup();
        controller.activate(60).await.unwrap();
        clock.advance(Duration::minutes(10));
        controller.activate(15).await.unwrap();

        assert_eq!(controller.is_suspended().await.remaining_seconds(), Some(15 * 60));
    }

    #[tokio::test]
    async fn clear_lifts_suspension_and_is_idempotent() {
        let (_, _, controller) = setup();
        controller.activate(30).await.unwrap();
        controller.clear().await.unwrap();
        controller.clear().await.unwrap();
        assert!(!controller.is_suspended().await.is_suspended());
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let (_, _, controller) = setup();
        assert!(matches!(
            controller.activate(0).await,
            Err(CooldownError::InvalidDuration)
        ));
    }

    #[tokio::test]
    async fn read_failure_fails_open() {
        let (store, _, controller) = setup();
        controller.activate(30).await.unwrap();
        store.fail_reads(true).await;
        assert_eq!(controller.is_suspended().await, CooldownState::Inactive);
    }

    #[tokio::test]
    async fn write_failure_propagates() {
        let (store, _, controller) = setup();
        store.fail_writes(true).await;
        assert!(matches!(
            controller.activate(30).await,
            Err(CooldownError::Persistence(_))
        ));
        assert!(controller.clear().await.is_err());
    }

    #[tokio::test]
    async fn naive_marker_is_read_as_utc() {
        let store = Arc::new(MemoryConfigStore::with_values([(
            COOLDOWN_END_TIME,
            "2024-03-20T14:10:00",
        )]));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 20, 14, 0, 0).unwrap(),
        ));
        let controller = CooldownController::new(store, clock);
        assert_eq!(controller.is_suspended().await.remaining_seconds(), Some(600));
    }

    #[tokio::test]
    async fn malformed_marker_fails_open() {
        let store = Arc::new(MemoryConfigStore::with_values([(COOLDOWN_END_TIME, "soon")]));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let controller = CooldownController::new(store, clock);
        assert!(!controller.is_suspended().await.is_suspended());
    }
}
