/// Availability checker
///
/// Filters favorites down to the ones worth a notification today and renders
/// their messages. A store is notified at most once per UTC day; the ledger
/// record is written as soon as the message is produced, before it is sent.

use std::sync::Arc;

use crate::clock::Clock;
use crate::ledger::{NotificationLedger, NotificationRecord};
use crate::tgtg::formatter::format_message;
use crate::tgtg::FavoriteItem;

pub struct ItemAvailabilityChecker {
    ledger: Arc<dyn NotificationLedger>,
    clock: Arc<dyn Clock>,
}

impl ItemAvailabilityChecker {
    pub fn new(ledger: Arc<dyn NotificationLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Messages for every favorite with stock whose store has not been
    /// notified today, in input order.
    pub async fn get_notification_messages(&self, favorites: &[FavoriteItem]) -> Vec<String> {
        let now = self.clock.now_utc();
        let today = now.date_naive();
        let mut messages = Vec::new();

        for favorite in favorites {
            if favorite.items_available <= 0 {
                continue;
            }

            let store_id = favorite.store_id();
            let records = match self.ledger.query(store_id).await {
                Ok(records) => records,
                Err(e) => {
                    log::error!("Skipping store {}, ledger lookup failed: {}", store_id, e);
                    continue;
                }
            };

            if records.iter().any(|r| r.notified_on(today)) {
                log::debug!("Store {} already notified today", store_id);
                continue;
            }

            messages.push(format_message(favorite, now));

            let record = NotificationRecord {
                store_id: store_id.to_string(),
                last_notification_date: now,
                items_available: favorite.items_available,
            };
            if let Err(e) = self.ledger.write(&record).await {
                log::error!("Failed to record notification for store {}: {}", store_id, e);
            }
        }

        messages
    }
}
