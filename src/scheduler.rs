/// Scheduler Module
///
/// Decides when the monitoring job should next run and keeps exactly one
/// future timer armed. Called on a fixed outer cadence; each call re-reads the
/// cooldown marker and the timer registry, so it is idempotent by
/// re-evaluation rather than by retrying internally.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use rand::Rng;
use std::sync::Arc;

use crate::clock::Clock;
use crate::cooldown::CooldownController;
use crate::trigger::{ArmedRun, ScheduledInvocation, TriggerRegistry};

/// No monitoring is scheduled on this day
pub const REST_DAY: Weekday = Weekday::Sun;

/// A time-of-day band, `[start_hour, end_hour)` UTC, with the delay range in
/// minutes (inclusive on both ends) applied while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub name: &'static str,
    pub start_hour: u32,
    pub end_hour: u32,
    pub min_delay_minutes: u32,
    pub max_delay_minutes: u32,
}

impl TimeWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }

    pub fn pick_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let minutes = rng.gen_range(self.min_delay_minutes..=self.max_delay_minutes);
        Duration::minutes(i64::from(minutes))
    }
}

pub const MORNING_WINDOW: TimeWindow = TimeWindow {
    name: "morning",
    start_hour: 10,
    end_hour: 12,
    min_delay_minutes: 10,
    max_delay_minutes: 20,
};

pub const AFTERNOON_WINDOW: TimeWindow = TimeWindow {
    name: "afternoon",
    start_hour: 12,
    end_hour: 19,
    min_delay_minutes: 2,
    max_delay_minutes: 5,
};

const WINDOWS: [TimeWindow; 2] = [MORNING_WINDOW, AFTERNOON_WINDOW];

/// Active window for `hour`, if any
pub fn window_for_hour(hour: u32) -> Option<TimeWindow> {
    WINDOWS.iter().copied().find(|w| w.contains(hour))
}

/// Next fire time from `now`, or `None` on the rest day and off-peak hours
pub fn next_invocation_time<R: Rng + ?Sized>(
    now: DateTime<Utc>,
    rng: &mut R,
) -> Option<DateTime<Utc>> {
    if now.weekday() == REST_DAY {
        log::info!("Today is {:?}, no next invocation scheduled", REST_DAY);
        return None;
    }

    let window = match window_for_hour(now.hour()) {
        Some(window) => window,
        None => {
            log::info!("Hour {} is outside every time window, no next invocation", now.hour());
            return None;
        }
    };

    let delay = window.pick_delay(rng);
    let next = now + delay;
    log::info!(
        "Current time falls within the {} window, next invocation at {} ({} minute delay)",
        window.name,
        next,
        delay.num_minutes()
    );
    Some(next)
}

/// What a single `schedule_next_invocation` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Cooldown active; the registry was not touched
    Suspended,
    /// A future run already exists
    AlreadyArmed(ArmedRun),
    /// Rest day or off-peak hour; stale timers were still collected
    NoWindow,
    Armed(ScheduledInvocation),
    /// Registration failed; the next tick re-evaluates from scratch
    RegistrationFailed(String),
}

pub struct InvocationScheduler {
    cooldown: Arc<CooldownController>,
    registry: Arc<dyn TriggerRegistry>,
    clock: Arc<dyn Clock>,
}

impl InvocationScheduler {
    pub fn new(
        cooldown: Arc<CooldownController>,
        registry: Arc<dyn TriggerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cooldown,
            registry,
            clock,
        }
    }

    pub async fn schedule_next_invocation(&self) -> ScheduleOutcome {
        if self.cooldown.is_suspended().await.is_suspended() {
            log::info!("Skipping schedule due to active cooldown");
            return ScheduleOutcome::Suspended;
        }

        let now = self.clock.now_utc();

        if let Some(existing) = self.collect_stale_runs(now).await {
            log::info!(
                "A future invocation is already scheduled ({}), no new timer armed",
                existing.id
            );
            return ScheduleOutcome::AlreadyArmed(existing);
        }

        let fire_at = {
            let mut rng = rand::thread_rng();
            next_invocation_time(now, &mut rng)
        };

        let fire_at = match fire_at {
            Some(fire_at) => fire_at,
            None => {
                log::info!("No next invocation scheduled due to off-peak hours or rest day");
                return ScheduleOutcome::NoWindow;
            }
        };

        let invocation = ScheduledInvocation::at(fire_at);
        match self.registry.arm(&invocation).await {
            Ok(()) => {
                log::info!(
                    "Created timer {} with expression {}",
                    invocation.id,
                    invocation.cron_expression
                );
                ScheduleOutcome::Armed(invocation)
            }
            Err(e) => {
                log::error!("Failed to create timer {}: {}", invocation.id, e);
                ScheduleOutcome::RegistrationFailed(e.to_string())
            }
        }
    }

    /// Return the first future run when one exists. Otherwise delete every
    /// enumerated run (all of them are due or unreadable) and return `None`.
    ///
    /// Listing failures are treated as an empty registry.
    async fn collect_stale_runs(&self, now: DateTime<Utc>) -> Option<ArmedRun> {
        let runs = match self.registry.list_armed().await {
            Ok(runs) => runs,
            Err(e) => {
                log::error!("Failed to list armed timers, assuming none: {}", e);
                return None;
            }
        };

        if let Some(future) = runs.iter().find(|r| r.is_future(now)) {
            return Some(future.clone());
        }

        for run in &runs {
            match self.registry.disarm(&run.id).await {
                Ok(()) => log::info!("Deleted past due timer {}", run.id),
                Err(e) => log::error!("Failed to delete timer {}: {}", run.id, e),
            }
        }

        None
    }
}
