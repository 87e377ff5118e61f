/// Trigger Runner Module
///
/// In-process stand-in for the platform's event rules: ticks the scheduler on
/// a fixed cadence and fires armed timers once they come due.

use anyhow::Result;
use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::app::App;
use crate::invocation::{on_monitoring_trigger, on_scheduler_tick, TriggerPayload};

/// Timers older than this when first seen are left to garbage collection
pub const FIRING_GRACE_MINUTES: i64 = 10;

/// Run the scheduler tick every `tick_minutes`, starting immediately
pub async fn start_scheduler_loop(app: Arc<App>, tick_minutes: u64) -> Result<()> {
    let mut interval = time::interval(Duration::from_secs(tick_minutes * 60));

    log::info!("Starting scheduler loop (every {} minutes)", tick_minutes);

    loop {
        interval.tick().await;
        on_scheduler_tick(&app, &TriggerPayload::default()).await;
    }
}

/// Poll the registry every `poll_seconds` and fire due timers
pub async fn start_trigger_loop(app: Arc<App>, poll_seconds: u64) -> Result<()> {
    let mut interval = time::interval(Duration::from_secs(poll_seconds));
    let mut firer = TimerFirer::new(ChronoDuration::minutes(FIRING_GRACE_MINUTES));

    log::info!("Starting trigger loop (polling every {} seconds)", poll_seconds);

    loop {
        interval.tick().await;
        firer.fire_due(&app).await;
    }
}

/// Remembers which timers this process already fired
pub struct TimerFirer {
    grace: ChronoDuration,
    fired: HashSet<String>,
}

impl TimerFirer {
    pub fn new(grace: ChronoDuration) -> Self {
        Self {
            grace,
            fired: HashSet::new(),
        }
    }

    /// Fire every timer due within the grace window that has not fired yet.
    /// Returns the ids fired on this call.
    pub async fn fire_due(&mut self, app: &App) -> Vec<String> {
        let runs = match app.registry.list_armed().await {
            Ok(runs) => runs,
            Err(e) => {
                log::error!("Failed to list armed timers: {}", e);
                return Vec::new();
            }
        };

        let now = app.clock.now_utc();
        let armed: HashSet<&str> = runs.iter().map(|r| r.id.as_str()).collect();
        self.fired.retain(|id| armed.contains(id.as_str()));

        let mut fired_now = Vec::new();
        for run in &runs {
            let fire_at = match run.fire_at {
                Some(fire_at) => fire_at,
                None => continue,
            };
            if fire_at > now || now - fire_at > self.grace || self.fired.contains(&run.id) {
                continue;
            }

            self.fired.insert(run.id.clone());
            fired_now.push(run.id.clone());

            if let Err(e) = on_monitoring_trigger(app, &TriggerPayload::for_rule(run.id.clone())).await {
                log::error!("Monitoring pass for {} failed: {}", run.id, e);
            }
        }

        fired_now
    }
}
