/// Monitoring pass
///
/// Sequences one pass: cooldown gate, favorites fetch, daily de-duplication,
/// delivery, and write-back of rotated credentials. Holds no state of its own;
/// everything is re-read from the durable stores on each call.

use std::sync::Arc;
use teloxide::utils::html;

use crate::availability::ItemAvailabilityChecker;
use crate::cooldown::{CooldownController, CooldownError};
use crate::notifier::Notifier;
use crate::preferences::NotificationPreference;
use crate::store::{ConfigStore, StoreError};
use crate::tgtg::{Credentials, UpstreamApi, UpstreamError};

pub const FORBIDDEN_ALERT: &str = "API access forbidden. Monitoring paused temporarily.";

#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("failed to activate cooldown: {0}")]
    Cooldown(#[from] CooldownError),

    #[error("failed to persist rotated credentials: {0}")]
    CredentialPersistence(#[from] StoreError),
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Suspended,
    NotificationsDisabled,
    MissingCredentials(Vec<&'static str>),
    Notified { sent: usize },
    CooldownActivated,
    UpstreamFailed(String),
}

/// Operator-facing text for a failed favorites fetch, safe to send as HTML
pub fn alert_for(error: &UpstreamError) -> String {
    let detail = html::escape(&error.to_string());
    match error {
        UpstreamError::Forbidden { .. } => FORBIDDEN_ALERT.to_string(),
        UpstreamError::Parsing { .. } => format!("TooGoodToNotify: System Error - {}", detail),
        UpstreamError::Connection { .. } => format!("TGTG API connection error: {}", detail),
        UpstreamError::Login(_) => format!("TGTG login failed: {}", detail),
    }
}

pub struct MonitoringOrchestrator {
    cooldown: Arc<CooldownController>,
    upstream: Arc<dyn UpstreamApi>,
    checker: ItemAvailabilityChecker,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn ConfigStore>,
    preference: NotificationPreference,
    seed_credentials: Credentials,
    cooldown_minutes: u32,
}

impl MonitoringOrchestrator {
    pub fn new(
        cooldown: Arc<CooldownController>,
        upstream: Arc<dyn UpstreamApi>,
        checker: ItemAvailabilityChecker,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn ConfigStore>,
        seed_credentials: Credentials,
        cooldown_minutes: u32,
    ) -> Self {
        Self {
            cooldown,
            upstream,
            checker,
            notifier,
            preference: NotificationPreference::new(store.clone()),
            store,
            seed_credentials,
            cooldown_minutes,
        }
    }

    pub async fn run_monitoring_pass(&self) -> Result<PassOutcome, MonitoringError> {
        let state = self.cooldown.is_suspended().await;
        if state.is_suspended() {
            log::info!(
                "Monitoring suspended by cooldown, {}s remaining",
                state.remaining_seconds().unwrap_or_default()
            );
            return Ok(PassOutcome::Suspended);
        }

        if !self.preference.is_enabled().await {
            log::info!("Notifications disabled by the user, skipping pass");
            return Ok(PassOutcome::NotificationsDisabled);
        }

        let persisted = Credentials::load(self.store.as_ref(), &self.seed_credentials).await;
        if !persisted.is_complete() {
            let missing = persisted.missing_fields();
            log::error!("Missing credentials ({}), skipping pass", missing.join(", "));
            return Ok(PassOutcome::MissingCredentials(missing));
        }

        let mut current = persisted.clone();
        let fetched = self.upstream.get_favorites(&mut current).await;
        let persistence = self.persist_rotation(&persisted, &current).await;

        let items = match fetched {
            Ok(items) => items,
            Err(error) => {
                if let Err(e) = persistence {
                    log::error!("{}", e);
                }
                return self.handle_upstream_error(error).await;
            }
        };

        log::info!("Fetched {} favorite items", items.len());

        let messages = self.checker.get_notification_messages(&items).await;
        for message in &messages {
            self.notifier.send(message).await;
        }

        persistence?;

        Ok(PassOutcome::Notified {
            sent: messages.len(),
        })
    }

    /// Write back credentials the client rotated, whatever the call's outcome
    async fn persist_rotation(
        &self,
        persisted: &Credentials,
        current: &Credentials,
    ) -> Result<(), MonitoringError> {
        if !current.rotated_from(persisted) {
            return Ok(());
        }
        log::info!("Credentials rotated during the pass, persisting");
        self.store.set(current.to_config_values()).await?;
        Ok(())
    }

    async fn handle_upstream_error(
        &self,
        error: UpstreamError,
    ) -> Result<PassOutcome, MonitoringError> {
        let alert = alert_for(&error);

        if let UpstreamError::Forbidden { .. } = error {
            log::warn!("Anti-bot detection triggered: {}", error);
            let activation = self.cooldown.activate(self.cooldown_minutes).await;
            self.notifier.send(&alert).await;
            activation?;
            return Ok(PassOutcome::CooldownActivated);
        }

        log::error!("Favorites fetch failed: {}", error);
        self.notifier.send(&alert).await;
        Ok(PassOutcome::UpstreamFailed(error.to_string()))
    }
}
