/// Upstream session credentials
///
/// The client may rotate tokens and the session cookie mid-call; callers
/// compare the values they hold afterwards against the last persisted ones and
/// write them back when they differ.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

use crate::store::{
    parse_timestamp, ConfigStore, ACCESS_TOKEN, LAST_TIME_TOKEN_REFRESHED, REFRESH_TOKEN, TGTG_COOKIE, USER_ID,
};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub cookie: Option<String>,
    pub last_time_token_refreshed: Option<DateTime<Utc>>,
}

impl Credentials {
    /// All four values a monitoring pass needs are present and non-empty
    pub fn is_complete(&self) -> bool {
        [
            &self.access_token,
            &self.refresh_token,
            &self.user_id,
            &self.cookie,
        ]
        .iter()
        .all(|v| v.as_deref().map(|s| !s.is_empty()).unwrap_or(false))
    }

    /// Names of the missing values, for diagnostics
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (name, value) in [
            (ACCESS_TOKEN, &self.access_token),
            (REFRESH_TOKEN, &self.refresh_token),
            (USER_ID, &self.user_id),
            (TGTG_COOKIE, &self.cookie),
        ] {
            if value.as_deref().map(str::is_empty).unwrap_or(true) {
                missing.push(name);
            }
        }
        missing
    }

    /// Whether the session values changed relative to `persisted`
    pub fn rotated_from(&self, persisted: &Credentials) -> bool {
        self.access_token != persisted.access_token
            || self.refresh_token != persisted.refresh_token
            || self.cookie != persisted.cookie
            || self.last_time_token_refreshed != persisted.last_time_token_refreshed
    }

    /// Read credentials from the durable store, key by key, falling back to
    /// `seed` for keys that are absent or cannot be read.
    pub async fn load(store: &dyn ConfigStore, seed: &Credentials) -> Credentials {
        let last_refreshed = read_key(store, LAST_TIME_TOKEN_REFRESHED)
            .await
            .and_then(|raw| parse_timestamp(&raw));

        Credentials {
            access_token: read_key(store, ACCESS_TOKEN)
                .await
                .or_else(|| seed.access_token.clone()),
            refresh_token: read_key(store, REFRESH_TOKEN)
                .await
                .or_else(|| seed.refresh_token.clone()),
            user_id: read_key(store, USER_ID).await.or_else(|| seed.user_id.clone()),
            cookie: read_key(store, TGTG_COOKIE)
                .await
                .or_else(|| seed.cookie.clone()),
            last_time_token_refreshed: last_refreshed.or(seed.last_time_token_refreshed),
        }
    }

    /// Key/value form written back to the durable store
    pub fn to_config_values(&self) -> HashMap<String, String> {
        let mut values = HashMap::new();
        let entries = [
            (ACCESS_TOKEN, &self.access_token),
            (REFRESH_TOKEN, &self.refresh_token),
            (USER_ID, &self.user_id),
            (TGTG_COOKIE, &self.cookie),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                values.insert(key.to_string(), value.clone());
            }
        }
        values.insert(
            LAST_TIME_TOKEN_REFRESHED.to_string(),
            self.last_time_token_refreshed
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        );
        values
    }
}

async fn read_key(store: &dyn ConfigStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            log::warn!("Failed to read {} from configuration store: {}", key, e);
            None
        }
    }
}

fn redact(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("<{} chars>", v.len()),
        None => "<unset>".to_string(),
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("user_id", &self.user_id)
            .field("cookie", &redact(&self.cookie))
            .field("last_time_token_refreshed", &self.last_time_token_refreshed)
            .finish()
    }
}
