/// Credential handshake
///
/// Obtaining fresh credentials means e-mailing the user a login link and
/// polling until they click it. The handshake is a small state machine
/// advanced by `check_ready`; the caller decides how often to call it.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::client::LoginApi;
use super::credentials::Credentials;
use crate::clock::Clock;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_TIMEOUT_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Pending,
    Ready(Credentials),
    Failed(String),
    TimedOut,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HandshakeState::Pending)
    }
}

pub struct CredentialHandshake {
    api: Arc<dyn LoginApi>,
    clock: Arc<dyn Clock>,
    email: String,
    polling_id: Option<String>,
    deadline: DateTime<Utc>,
    state: HandshakeState,
}

impl CredentialHandshake {
    /// Send the login e-mail and start the clock. A failed request leaves the
    /// handshake in `Failed`.
    pub async fn start(
        api: Arc<dyn LoginApi>,
        clock: Arc<dyn Clock>,
        email: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let email = email.into();
        let deadline = clock.now_utc() + timeout;

        let (polling_id, state) = match api.request_login_email(&email).await {
            Ok(polling_id) => (Some(polling_id), HandshakeState::Pending),
            Err(e) => {
                log::error!("Failed to request new credentials: {}", e);
                (None, HandshakeState::Failed(e.to_string()))
            }
        };

        Self {
            api,
            clock,
            email,
            polling_id,
            deadline,
            state,
        }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Poll once unless already terminal
    pub async fn check_ready(&mut self) -> &HandshakeState {
        if self.state.is_terminal() {
            return &self.state;
        }

        if self.clock.now_utc() >= self.deadline {
            log::warn!("Credential handshake for {} timed out", self.email);
            self.state = HandshakeState::TimedOut;
            return &self.state;
        }

        let polling_id = match self.polling_id.as_deref() {
            Some(id) => id,
            None => {
                self.state = HandshakeState::Failed("no polling id".to_string());
                return &self.state;
            }
        };

        self.state = match self.api.poll_login(&self.email, polling_id).await {
            Ok(Some(credentials)) if credentials.is_complete() => {
                log::info!("New credentials received for {}", self.email);
                HandshakeState::Ready(credentials)
            }
            Ok(Some(credentials)) => HandshakeState::Failed(format!(
                "incomplete credentials received, missing {}",
                credentials.missing_fields().join(", ")
            )),
            Ok(None) => HandshakeState::Pending,
            Err(e) => {
                log::error!("Credential polling failed: {}", e);
                HandshakeState::Failed(e.to_string())
            }
        };

        &self.state
    }

    /// Drive the handshake on a fixed interval until it settles
    pub async fn wait(mut self, every: std::time::Duration) -> HandshakeState {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if self.check_ready().await.is_terminal() {
                return self.state;
            }
        }
    }
}
