/// Notification preference
///
/// User-controlled on/off switch for monitoring, kept in the configuration
/// store so it survives restarts. Absent or unreadable means enabled.

use std::collections::HashMap;
use std::sync::Arc;

use crate::store::{ConfigStore, StoreResult, NOTIFICATIONS_ENABLED};

pub struct NotificationPreference {
    store: Arc<dyn ConfigStore>,
}

impl NotificationPreference {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    pub async fn is_enabled(&self) -> bool {
        match self.store.get(NOTIFICATIONS_ENABLED).await {
            Ok(Some(value)) => !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0" | "off"),
            Ok(None) => true,
            Err(e) => {
                log::error!("Failed to read notification preference, assuming enabled: {}", e);
                true
            }
        }
    }

    pub async fn set_enabled(&self, enabled: bool) -> StoreResult<()> {
        let mut values = HashMap::new();
        values.insert(NOTIFICATIONS_ENABLED.to_string(), enabled.to_string());
        self.store.set(values).await?;
        log::info!("Notifications {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}
