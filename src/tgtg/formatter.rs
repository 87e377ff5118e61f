/// Notification rendering
///
/// Turns an available favorite into the Telegram message (HTML parse mode)
/// sent to the user.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use teloxide::utils::html;

use super::models::{FavoriteItem, PickupInterval};

pub const PICKUP_UNAVAILABLE: &str = "Pickup time unavailable";
pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// Pickup window in the store's local time, labelled relative to `now`
pub fn format_pickup_interval(
    interval: Option<&PickupInterval>,
    store_time_zone: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let interval = match interval {
        Some(i) if !i.start.is_empty() && !i.end.is_empty() => i,
        _ => {
            log::warn!("Pickup interval is missing or incomplete");
            return PICKUP_UNAVAILABLE.to_string();
        }
    };

    let tz: Tz = match store_time_zone {
        Some(name) if !name.is_empty() => match name.parse() {
            Ok(tz) => tz,
            Err(_) => {
                log::error!("Invalid timezone: {}", name);
                return PICKUP_UNAVAILABLE.to_string();
            }
        },
        _ => Tz::UTC,
    };

    let (start, end) = match (
        DateTime::parse_from_rfc3339(&interval.start),
        DateTime::parse_from_rfc3339(&interval.end),
    ) {
        (Ok(start), Ok(end)) => (start.with_timezone(&tz), end.with_timezone(&tz)),
        _ => {
            log::error!(
                "Error parsing pickup interval {} - {}",
                interval.start,
                interval.end
            );
            return PICKUP_UNAVAILABLE.to_string();
        }
    };

    let today = now.with_timezone(&tz).date_naive();
    let start_day = start.date_naive();

    let label = if start_day == today {
        "<b>Aujourd'hui</b>".to_string()
    } else if start_day == today + Duration::days(1) {
        "<b>Demain</b>".to_string()
    } else {
        start.format("%d/%m").to_string()
    };

    format!(
        "{} de {} à {}",
        label,
        start.format("%H:%M"),
        end.format("%H:%M")
    )
}

pub fn format_message(item: &FavoriteItem, now: DateTime<Utc>) -> String {
    let count_label = if item.items_available > 1 {
        "nouveaux paniers disponibles chez"
    } else {
        "nouveau panier disponible chez"
    };

    let mut message = format!(
        "🍽 {} {} <a href=\"{}\">{}</a>\n\n",
        item.items_available,
        count_label,
        item.share_url(),
        html::escape(&item.store.store_name)
    );

    if let Some(description) = item.item.description.as_deref().filter(|d| !d.is_empty()) {
        message.push_str(&html::escape(description));
        message.push_str("\n\n");
    }

    message.push_str(&format!(
        "💰 <b>{}</b> au lieu de {}\n",
        item.item.item_price, item.item.item_value
    ));

    let pickup = format_pickup_interval(
        item.pickup_interval.as_ref(),
        item.store.store_time_zone.as_deref(),
        now,
    );

    let location = item
        .pickup_location
        .as_ref()
        .and_then(|l| l.address.address_line.as_deref())
        .unwrap_or(UNKNOWN_LOCATION);

    message.push_str(&format!("⏰ {}\n", pickup));
    message.push_str(&format!("📍 {}", html::escape(location)));
    message
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tgtg::models::{Item, PickupAddress, PickupLocation, Price, Store};
    use chrono::TimeZone;

    pub(crate) fn sample_item(store_id: &str, items_available: i32) -> FavoriteItem {
        FavoriteItem {
            item: Item {
                item_id: "456".into(),
                item_price: Price {
                    code: "EUR".into(),
                    minor_units: 599,
                    decimals: 2,
                },
                item_value: Price {
                    code: "EUR".into(),
                    minor_units: 1599,
                    decimals: 2,
                },
                name: "Test Item".into(),
                description: Some("Test Description".into()),
            },
            store: Store {
                store_id: store_id.into(),
                store_name: "Test Store".into(),
                store_time_zone: Some("Europe/Paris".into()),
            },
            display_name: "Test Store".into(),
            items_available,
            pickup_interval: Some(PickupInterval {
                start: "2024-03-20T14:00:00Z".into(),
                end: "2024-03-20T18:00:00Z".into(),
            }),
            pickup_location: Some(PickupLocation {
                address: PickupAddress {
                    address_line: Some("123 Test Street".into()),
                },
            }),
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn pickup_today_uses_store_local_time() {
        let item = sample_item("123", 2);
        let text = format_pickup_interval(item.pickup_interval.as_ref(), Some("Europe/Paris"), at(20));
        assert_eq!(text, "<b>Aujourd'hui</b> de 15:00 à 19:00");
    }

    #[test]
    fn pickup_tomorrow_and_later_dates() {
        let item = sample_item("123", 2);
        let tomorrow = format_pickup_interval(item.pickup_interval.as_ref(), Some("Europe/Paris"), at(19));
        assert!(tomorrow.starts_with("<b>Demain</b>"));

        let later = format_pickup_interval(item.pickup_interval.as_ref(), Some("Europe/Paris"), at(18));
        assert!(later.starts_with("20/03"));
    }

    #[test]
    fn unusable_intervals_fall_back() {
        let item = sample_item("123", 2);
        assert_eq!(
            format_pickup_interval(item.pickup_interval.as_ref(), Some("Invalid/Timezone"), at(20)),
            PICKUP_UNAVAILABLE
        );

        let incomplete = PickupInterval {
            start: String::new(),
            end: "2024-03-20T18:00:00Z".into(),
        };
        assert_eq!(
            format_pickup_interval(Some(&incomplete), Some("Europe/Paris"), at(20)),
            PICKUP_UNAVAILABLE
        );
        assert_eq!(format_pickup_interval(None, Some("Europe/Paris"), at(20)), PICKUP_UNAVAILABLE);
    }

    #[test]
    fn message_carries_store_price_and_location() {
        let message = format_message(&sample_item("123", 2), at(20));
        assert!(message.contains("2 nouveaux paniers disponibles chez"));
        assert!(message.contains("https://share.toogoodtogo.com/item/456"));
        assert!(message.contains("Test Store"));
        assert!(message.contains("Test Description"));
        assert!(message.contains("<b>5.99€</b> au lieu de 15.99€"));
        assert!(message.contains("123 Test Street"));
    }

    #[test]
    fn single_item_and_missing_location() {
        let mut item = sample_item("123", 1);
        item.pickup_location = None;
        let message = format_message(&item, at(20));
        assert!(message.contains("1 nouveau panier disponible chez"));
        assert!(message.contains(UNKNOWN_LOCATION));
    }

    #[test]
    fn store_names_are_escaped() {
        let mut item = sample_item("123", 1);
        item.store.store_name = "Pain & <Co>".into();
        let message = format_message(&item, at(20));
        assert!(message.contains("Pain &amp; &lt;Co&gt;"));
    }
}
