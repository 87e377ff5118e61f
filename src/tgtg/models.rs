/// Favorite item payloads returned by the marketplace API
///
/// Only the fields needed for availability checks and message rendering are
/// modelled; everything else in the payload is ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub code: String,
    pub minor_units: i64,
    pub decimals: u32,
}

impl Price {
    fn symbol(&self) -> &str {
        match self.code.as_str() {
            "EUR" => "€",
            "USD" => "$",
            other => other,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.minor_units as f64 / 10f64.powi(self.decimals as i32);
        write!(f, "{:.2}{}", value, self.symbol())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub item_price: Price,
    pub item_value: Price,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub store_id: String,
    pub store_name: String,
    #[serde(default)]
    pub store_time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupInterval {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PickupAddress {
    #[serde(default)]
    pub address_line: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupLocation {
    #[serde(default)]
    pub address: PickupAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteItem {
    pub item: Item,
    pub store: Store,
    #[serde(default)]
    pub display_name: String,
    pub items_available: i32,
    #[serde(default)]
    pub pickup_interval: Option<PickupInterval>,
    #[serde(default)]
    pub pickup_location: Option<PickupLocation>,
}

impl FavoriteItem {
    pub fn store_id(&self) -> &str {
        &self.store.store_id
    }

    pub fn share_url(&self) -> String {
        format!("https://share.toogoodtogo.com/item/{}", self.item.item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_renders_with_currency_symbol() {
        let price = Price {
            code: "EUR".into(),
            minor_units: 599,
            decimals: 2,
        };
        assert_eq!(price.to_string(), "5.99€");

        let price = Price {
            code: "GBP".into(),
            minor_units: 1500,
            decimals: 2,
        };
        assert_eq!(price.to_string(), "15.00GBP");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = serde_json::json!({
            "item": {
                "item_id": "456",
                "item_price": {"code": "EUR", "minor_units": 599, "decimals": 2},
                "item_value": {"code": "EUR", "minor_units": 1599, "decimals": 2},
                "cover_picture": {"picture_id": "x", "current_url": "http://x"},
                "name": "Panier"
            },
            "store": {"store_id": "123", "store_name": "Test Store", "branch": "Centre"},
            "display_name": "Test Store - Centre",
            "items_available": 2,
            "distance": 1.4,
            "favorite": true
        });

        let item: FavoriteItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.store_id(), "123");
        assert_eq!(item.items_available, 2);
        assert!(item.pickup_interval.is_none());
    }
}
