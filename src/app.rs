/// Application context
///
/// Wires the core components to their collaborators once at startup. Both
/// the HTTP server, the runner and the bot share one `App` behind an `Arc`.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use crate::availability::ItemAvailabilityChecker;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::cooldown::CooldownController;
use crate::ledger::{NotificationLedger, PgLedger};
use crate::monitoring::MonitoringOrchestrator;
use crate::notifier::Notifier;
use crate::preferences::NotificationPreference;
use crate::scheduler::InvocationScheduler;
use crate::store::{ConfigStore, PgConfigStore};
use crate::tgtg::{Credentials, LoginApi, TgtgClient, UpstreamApi};
use crate::trigger::{PgTriggerRegistry, TriggerRegistry};

/// External collaborators the core runs against
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn ConfigStore>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub registry: Arc<dyn TriggerRegistry>,
    pub upstream: Arc<dyn UpstreamApi>,
    pub login: Arc<dyn LoginApi>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct App {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn ConfigStore>,
    pub registry: Arc<dyn TriggerRegistry>,
    pub login: Arc<dyn LoginApi>,
    pub notifier: Arc<dyn Notifier>,
    pub cooldown: Arc<CooldownController>,
    pub preference: NotificationPreference,
    pub scheduler: InvocationScheduler,
    pub orchestrator: MonitoringOrchestrator,
    pub user_email: Option<String>,
}

impl App {
    pub fn new(
        parts: Collaborators,
        seed_credentials: Credentials,
        cooldown_minutes: u32,
        user_email: Option<String>,
    ) -> Self {
        let cooldown = Arc::new(CooldownController::new(
            parts.store.clone(),
            parts.clock.clone(),
        ));
        let scheduler = InvocationScheduler::new(
            cooldown.clone(),
            parts.registry.clone(),
            parts.clock.clone(),
        );
        let checker = ItemAvailabilityChecker::new(parts.ledger, parts.clock.clone());
        let orchestrator = MonitoringOrchestrator::new(
            cooldown.clone(),
            parts.upstream,
            checker,
            parts.notifier.clone(),
            parts.store.clone(),
            seed_credentials,
            cooldown_minutes,
        );

        let preference = NotificationPreference::new(parts.store.clone());

        Self {
            clock: parts.clock,
            store: parts.store,
            registry: parts.registry,
            login: parts.login,
            notifier: parts.notifier,
            cooldown,
            preference,
            scheduler,
            orchestrator,
            user_email,
        }
    }

    /// Production wiring: Postgres stores and the live marketplace client
    pub fn from_config(config: &Config, pool: PgPool, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let client = Arc::new(
            TgtgClient::new(config.tgtg_base_url.clone(), clock.clone())
                .context("Failed to build marketplace client")?,
        );

        let parts = Collaborators {
            clock,
            store: Arc::new(PgConfigStore::new(pool.clone())),
            ledger: Arc::new(PgLedger::new(pool.clone())),
            registry: Arc::new(PgTriggerRegistry::new(pool)),
            upstream: client.clone(),
            login: client,
            notifier,
        };

        Ok(Self::new(
            parts,
            config.seed_credentials.clone(),
            config.cooldown_minutes,
            config.user_email.clone(),
        ))
    }
}
