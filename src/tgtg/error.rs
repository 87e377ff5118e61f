/// Failures surfaced by the marketplace API
///
/// Each variant drives a distinct branch of a monitoring pass, so callers
/// match on the variant instead of inspecting messages.

use reqwest::StatusCode;

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Credentials rejected or malformed
    #[error("login failed: {0}")]
    Login(String),

    /// Response did not match the expected schema
    #[error("unexpected response shape: {message}{}", data_suffix(.data))]
    Parsing {
        message: String,
        data: Option<String>,
    },

    /// Anti-bot detection (HTTP 403 or a captcha challenge)
    #[error("access forbidden (403): {message}")]
    Forbidden { message: String },

    #[error("connection failed: {message}{}", status_suffix(.status))]
    Connection {
        message: String,
        status: Option<u16>,
    },
}

impl UpstreamError {
    pub fn parsing(message: impl Into<String>, data: Option<String>) -> Self {
        Self::Parsing {
            message: message.into(),
            data: data.map(|d| truncate(&d, 300)),
        }
    }

    pub fn connection(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Connection {
            message: message.into(),
            status,
        }
    }

    /// Forbidden is a specialised connection failure
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Forbidden { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Forbidden { .. } => Some(403),
            Self::Connection { status, .. } => *status,
            _ => None,
        }
    }
}

fn data_suffix(data: &Option<String>) -> String {
    data.as_ref()
        .map(|d| format!(" | data: {}", d))
        .unwrap_or_default()
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|s| format!(" (status code: {})", s))
        .unwrap_or_default()
}

/// Classify a failed exchange. `status` is `None` for transport failures.
pub fn classify_failure(status: Option<StatusCode>, text: &str) -> UpstreamError {
    if text.to_lowercase().contains("captcha") {
        log::error!("Anti-bot captcha challenge detected");
        return UpstreamError::Forbidden {
            message: "Blocked by captcha challenge".to_string(),
        };
    }

    match status {
        Some(StatusCode::FORBIDDEN) => UpstreamError::Forbidden {
            message: truncate(text, 200),
        },
        Some(StatusCode::UNAUTHORIZED) => {
            UpstreamError::Login(format!("credentials rejected: {}", truncate(text, 200)))
        }
        Some(status) => UpstreamError::connection(truncate(text, 200), Some(status.as_u16())),
        None => UpstreamError::connection(truncate(text, 200), None),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
