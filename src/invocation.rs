/// Entry points
///
/// The two externally triggered operations. Trigger payloads carry the
/// identities of the resources that caused the invocation; monitoring runs
/// only when one of them names a monitoring rule.

use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::monitoring::{MonitoringError, PassOutcome};
use crate::scheduler::ScheduleOutcome;
use crate::trigger::RULE_NAME_PREFIX;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerPayload {
    #[serde(default)]
    pub resources: Vec<String>,
}

impl TriggerPayload {
    pub fn for_rule(id: impl Into<String>) -> Self {
        Self {
            resources: vec![id.into()],
        }
    }
}

pub fn is_monitoring_event(payload: &TriggerPayload) -> bool {
    payload
        .resources
        .iter()
        .any(|resource| resource.contains(RULE_NAME_PREFIX))
}

/// Run a monitoring pass if the payload names a monitoring rule.
/// `None` means the payload was ignored.
pub async fn on_monitoring_trigger(
    app: &App,
    payload: &TriggerPayload,
) -> Result<Option<PassOutcome>, MonitoringError> {
    if !is_monitoring_event(payload) {
        log::info!("Ignoring non-monitoring trigger: {:?}", payload.resources);
        return Ok(None);
    }

    log::info!("Monitoring triggered by {:?}", payload.resources);
    let outcome = app.orchestrator.run_monitoring_pass().await?;
    log::info!("Monitoring pass finished: {:?}", outcome);
    Ok(Some(outcome))
}

pub async fn on_scheduler_tick(app: &App, _payload: &TriggerPayload) -> ScheduleOutcome {
    let outcome = app.scheduler.schedule_next_invocation().await;
    log::debug!("Scheduler tick: {:?}", outcome);
    outcome
}
