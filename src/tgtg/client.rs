/// Marketplace HTTP client
///
/// Thin reqwest wrapper over the handful of endpoints this service uses:
/// favorites, token refresh and the e-mail login handshake. Every failure is
/// classified into `UpstreamError` before it leaves this module.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::credentials::Credentials;
use super::error::{classify_failure, UpstreamError, UpstreamResult};
use super::models::FavoriteItem;
use crate::clock::Clock;

pub const DEFAULT_BASE_URL: &str = "https://apptoogoodtogo.com/api/";

const USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_7_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Mobile/15E148 Safari/604.1";
const DEVICE_TYPE: &str = "IPHONE";

const FAVORITES_ENDPOINT: &str = "discover/v1/bucket";
const REFRESH_ENDPOINT: &str = "auth/v5/token/refresh";
const AUTH_BY_EMAIL_ENDPOINT: &str = "auth/v5/authByEmail";
const AUTH_POLLING_ENDPOINT: &str = "auth/v5/authByRequestPollingId";

/// Access tokens are refreshed once they are older than this
const ACCESS_TOKEN_LIFETIME_HOURS: i64 = 4;

/// Source of favorite items
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Fetch the favorites. `credentials` is updated in place whenever the
    /// session rotates, including on calls that end in an error.
    async fn get_favorites(&self, credentials: &mut Credentials) -> UpstreamResult<Vec<FavoriteItem>>;
}

/// E-mail login handshake used to obtain a fresh set of credentials
#[async_trait]
pub trait LoginApi: Send + Sync {
    /// Ask the API to e-mail a login link; returns the polling id
    async fn request_login_email(&self, email: &str) -> UpstreamResult<String>;

    /// `Ok(None)` while the user has not confirmed the e-mail yet
    async fn poll_login(&self, email: &str, polling_id: &str) -> UpstreamResult<Option<Credentials>>;
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct AuthByEmailResponse {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    polling_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollingResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    startup_data: Option<StartupData>,
}

#[derive(Debug, Deserialize)]
struct StartupData {
    user: StartupUser,
}

#[derive(Debug, Deserialize)]
struct StartupUser {
    user_id: String,
}

pub struct TgtgClient {
    http: reqwest::Client,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl TgtgClient {
    pub fn new(base_url: impl Into<String>, clock: Arc<dyn Clock>) -> UpstreamResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| UpstreamError::connection(format!("Failed to create HTTP client: {}", e), None))?;

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            clock,
        })
    }

    fn headers(&self, credentials: Option<&Credentials>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("accept-language", HeaderValue::from_static("fr-FR"));
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        if let Some(credentials) = credentials {
            if let Some(cookie) = credentials.cookie.as_deref() {
                if let Ok(value) = HeaderValue::from_str(cookie) {
                    headers.insert("cookie", value);
                }
            }
            if let Some(token) = credentials.access_token.as_deref() {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                    headers.insert("authorization", value);
                }
            }
        }

        headers
    }

    /// POST and return the successful response, classifying every failure
    async fn post(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
        body: serde_json::Value,
    ) -> UpstreamResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        log::debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .headers(self.headers(credentials))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_failure(None, &format!("Failed to reach {}: {}", endpoint, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        log::error!("{} returned {}: {}", endpoint, status, text);
        Err(classify_failure(Some(status), &text))
    }

    fn token_expired(&self, credentials: &Credentials) -> bool {
        match credentials.last_time_token_refreshed {
            Some(at) => {
                self.clock.now_utc() - at >= ChronoDuration::hours(ACCESS_TOKEN_LIFETIME_HOURS)
            }
            None => true,
        }
    }

    /// Refresh the access token when it is older than its lifetime
    async fn refresh_if_needed(&self, credentials: &Credentials) -> UpstreamResult<Credentials> {
        if !self.token_expired(credentials) {
            return Ok(credentials.clone());
        }

        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| UpstreamError::Login("refresh token missing".to_string()))?;

        log::info!("Access token expired, refreshing");
        let response = self
            .post(
                REFRESH_ENDPOINT,
                Some(credentials),
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await
            .map_err(|e| match e {
                UpstreamError::Connection { status: Some(400), message } => {
                    UpstreamError::Login(format!("token refresh rejected: {}", message))
                }
                other => other,
            })?;

        let cookie = cookie_from(response.headers());
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::parsing(format!("Invalid token refresh response: {}", e), None))?;

        let mut refreshed = credentials.clone();
        refreshed.access_token = Some(body.access_token);
        refreshed.refresh_token = Some(body.refresh_token);
        if cookie.is_some() {
            refreshed.cookie = cookie;
        }
        refreshed.last_time_token_refreshed = Some(self.clock.now_utc());
        Ok(refreshed)
    }
}

#[async_trait]
impl UpstreamApi for TgtgClient {
    async fn get_favorites(&self, credentials: &mut Credentials) -> UpstreamResult<Vec<FavoriteItem>> {
        if !credentials.is_complete() {
            return Err(UpstreamError::Login(format!(
                "missing credentials: {}",
                credentials.missing_fields().join(", ")
            )));
        }

        *credentials = self.refresh_if_needed(credentials).await?;

        let body = serde_json::json!({
            "origin": { "latitude": 0.0, "longitude": 0.0 },
            "radius": 30,
            "user_id": credentials.user_id,
            "paging": { "page": 0, "size": 50 },
            "bucket": { "filler_type": "Favorites" },
        });

        log::info!("Fetching favorite items");
        let response = self.post(FAVORITES_ENDPOINT, Some(&*credentials), body).await?;

        if let Some(cookie) = cookie_from(response.headers()) {
            credentials.cookie = Some(cookie);
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify_failure(None, &format!("Failed to read favorites response: {}", e)))?;

        let items = parse_favorites(&text)?;
        log::info!("Parsed {} favorite items", items.len());

        Ok(items)
    }
}

#[async_trait]
impl LoginApi for TgtgClient {
    async fn request_login_email(&self, email: &str) -> UpstreamResult<String> {
        let response = self
            .post(
                AUTH_BY_EMAIL_ENDPOINT,
                None,
                serde_json::json!({ "device_type": DEVICE_TYPE, "email": email }),
            )
            .await?;

        let body: AuthByEmailResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::parsing(format!("Invalid login response: {}", e), None))?;

        match (body.state.as_deref(), body.polling_id) {
            (Some("TERMS"), _) => Err(UpstreamError::Login(format!(
                "{} is not linked to an account, sign up in the app first",
                email
            ))),
            (_, Some(polling_id)) => {
                log::info!("Login e-mail sent to {}", email);
                Ok(polling_id)
            }
            (state, None) => Err(UpstreamError::Login(format!(
                "unexpected login state {:?}",
                state
            ))),
        }
    }

    async fn poll_login(&self, email: &str, polling_id: &str) -> UpstreamResult<Option<Credentials>> {
        let response = self
            .post(
                AUTH_POLLING_ENDPOINT,
                None,
                serde_json::json!({
                    "device_type": DEVICE_TYPE,
                    "email": email,
                    "request_polling_id": polling_id,
                }),
            )
            .await?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(None);
        }

        let cookie = cookie_from(response.headers());
        let body: PollingResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::parsing(format!("Invalid polling response: {}", e), None))?;

        Ok(Some(Credentials {
            access_token: Some(body.access_token),
            refresh_token: Some(body.refresh_token),
            user_id: body.startup_data.map(|d| d.user.user_id),
            cookie,
            last_time_token_refreshed: Some(self.clock.now_utc()),
        }))
    }
}

/// Extract the favorites list from a bucket response body
pub fn parse_favorites(text: &str) -> UpstreamResult<Vec<FavoriteItem>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| UpstreamError::parsing(format!("Response is not JSON: {}", e), Some(text.to_string())))?;

    let items = value
        .get("mobile_bucket")
        .and_then(|bucket| bucket.get("items"))
        .cloned()
        .ok_or_else(|| UpstreamError::parsing("Missing mobile_bucket.items", Some(text.to_string())))?;

    serde_json::from_value(items)
        .map_err(|e| UpstreamError::parsing(format!("Error parsing item details: {}", e), Some(text.to_string())))
}

/// Join every `set-cookie` pair into a single `Cookie` header value
fn cookie_from(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 14, 0, 0).unwrap()
    }

    fn test_client(base_url: &str) -> TgtgClient {
        TgtgClient::new(base_url, Arc::new(FixedClock::new(now()))).unwrap()
    }

    fn fresh_credentials() -> Credentials {
        Credentials {
            access_token: Some("access".into()),
            refresh_token: Some("refresh".into()),
            user_id: Some("42".into()),
            cookie: Some("datadome=abc".into()),
            last_time_token_refreshed: Some(now() - ChronoDuration::minutes(30)),
        }
    }

    fn favorites_body() -> serde_json::Value {
        serde_json::json!({
            "mobile_bucket": {
                "filler_type": "Favorites",
                "items": [{
                    "item": {
                        "item_id": "456",
                        "item_price": {"code": "EUR", "minor_units": 599, "decimals": 2},
                        "item_value": {"code": "EUR", "minor_units": 1599, "decimals": 2},
                        "name": "Panier"
                    },
                    "store": {"store_id": "123", "store_name": "Test Store"},
                    "display_name": "Test Store",
                    "items_available": 2
                }]
            }
        })
    }

    #[tokio::test]
    async fn fetches_favorites_with_session_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/discover/v1/bucket"))
            .and(header("authorization", "Bearer access"))
            .and(header("cookie", "datadome=abc"))
            .and(body_partial_json(serde_json::json!({"bucket": {"filler_type": "Favorites"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(favorites_body()))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let mut credentials = fresh_credentials();
        let items = client.get_favorites(&mut credentials).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].store_id(), "123");
        assert!(!credentials.rotated_from(&fresh_credentials()));
    }

    #[tokio::test]
    async fn forbidden_status_is_anti_bot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/discover/v1/bucket"))
            .respond_with(ResponseTemplate::new(403).set_body_string("blocked"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .get_favorites(&mut fresh_credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn captcha_body_is_anti_bot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"url":"https://geo.captcha-delivery.com/captcha/?initialCid=x"}"#),
            )
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .get_favorites(&mut fresh_credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn malformed_items_are_a_parsing_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "mobile_bucket": {"items": [{"invalid_key": "value"}]}
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .get_favorites(&mut fresh_credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Parsing { .. }));
    }

    #[tokio::test]
    async fn server_error_is_a_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .get_favorites(&mut fresh_credentials())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(matches!(err, UpstreamError::Connection { .. }));
    }

    #[tokio::test]
    async fn incomplete_credentials_never_reach_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(favorites_body()))
            .expect(0)
            .mount(&server)
            .await;

        let mut credentials = fresh_credentials();
        credentials.cookie = None;
        let err = test_client(&server.uri())
            .get_favorites(&mut credentials)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Login(_)));
    }

    #[tokio::test]
    async fn stale_token_is_rotated_before_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v5/token/refresh"))
            .and(body_partial_json(serde_json::json!({"refresh_token": "refresh"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "datadome=new; Path=/; Secure")
                    .set_body_json(serde_json::json!({
                        "access_token": "access-2",
                        "refresh_token": "refresh-2"
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/discover/v1/bucket"))
            .and(header("authorization", "Bearer access-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(favorites_body()))
            .mount(&server)
            .await;

        let mut stale = fresh_credentials();
        stale.last_time_token_refreshed = Some(now() - ChronoDuration::hours(5));

        let mut credentials = stale.clone();
        test_client(&server.uri()).get_favorites(&mut credentials).await.unwrap();

        assert!(credentials.rotated_from(&stale));
        assert_eq!(credentials.access_token.as_deref(), Some("access-2"));
        assert_eq!(credentials.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(credentials.cookie.as_deref(), Some("datadome=new"));
        assert_eq!(credentials.last_time_token_refreshed, Some(now()));
    }

    #[tokio::test]
    async fn rotation_survives_a_failed_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v5/token/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "refresh_token": "refresh-2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/discover/v1/bucket"))
            .respond_with(ResponseTemplate::new(403).set_body_string("blocked"))
            .mount(&server)
            .await;

        let mut stale = fresh_credentials();
        stale.last_time_token_refreshed = Some(now() - ChronoDuration::hours(5));
        let mut credentials = stale.clone();

        let err = test_client(&server.uri())
            .get_favorites(&mut credentials)
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::Forbidden { .. }));
        assert!(credentials.rotated_from(&stale));
        assert_eq!(credentials.access_token.as_deref(), Some("access-2"));
    }

    #[tokio::test]
    async fn login_polling_reports_pending_then_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v5/authByEmail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": "WAIT",
                "polling_id": "poll-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v5/authByRequestPollingId"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v5/authByRequestPollingId"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "datadome=fresh; Path=/")
                    .set_body_json(serde_json::json!({
                        "access_token": "a",
                        "refresh_token": "r",
                        "startup_data": {"user": {"user_id": "99"}}
                    })),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let polling_id = client.request_login_email("me@example.com").await.unwrap();
        assert_eq!(polling_id, "poll-1");

        assert!(client.poll_login("me@example.com", &polling_id).await.unwrap().is_none());

        let credentials = client
            .poll_login("me@example.com", &polling_id)
            .await
            .unwrap()
            .unwrap();
        assert!(credentials.is_complete());
        assert_eq!(credentials.user_id.as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn unknown_account_is_a_login_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v5/authByEmail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": "TERMS"
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .request_login_email("nobody@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Login(_)));
    }

    #[test]
    fn cookie_pairs_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; HttpOnly"));
        assert_eq!(cookie_from(&headers).as_deref(), Some("a=1; b=2"));
    }
}
