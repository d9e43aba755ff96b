//! Error taxonomy for upstream API calls.

use serde::Deserialize;
use thiserror::Error;

/// Result type for upstream API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Reasons the Data API uses when the daily budget is spent.
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded"];

/// Reasons the Data API uses for bad or missing credentials.
const AUTH_REASONS: &[&str] = &["keyInvalid", "keyExpired", "authError", "unauthorized"];

/// Error returned by the API client.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Timeout, DNS failure, refused or reset connection.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status not covered by a more specific variant.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// First machine-readable reason from the error body.
        reason: Option<String>,
        /// Human-readable message.
        message: String,
    },

    /// The daily quota is spent. Never retried.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Credentials were rejected. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The response body did not match the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Whether the failed call may succeed if repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => is_retryable_status(*status),
            Self::QuotaExceeded(_) | Self::Auth(_) | Self::Decode(_) | Self::InvalidRequest(_) => {
                false
            }
        }
    }

    /// HTTP status associated with the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::QuotaExceeded(_) => Some(403),
            Self::Auth(_) => Some(401),
            Self::Network(_) | Self::Decode(_) | Self::InvalidRequest(_) => None,
        }
    }

    /// Classify a non-success response from its status and body.
    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let reason = parsed.as_ref().and_then(ErrorEnvelope::reason);
        let message = parsed
            .as_ref()
            .and_then(|e| e.error.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| truncate(body, 200));

        let is_quota = reason
            .as_deref()
            .is_some_and(|r| QUOTA_REASONS.contains(&r));
        let is_auth = reason.as_deref().is_some_and(|r| AUTH_REASONS.contains(&r));

        match status {
            403 if is_quota => Self::QuotaExceeded(message),
            401 => Self::Auth(message),
            400 | 403 if is_auth => Self::Auth(message),
            _ => Self::Http {
                status,
                reason,
                message,
            },
        }
    }

    /// Classify a transport-level failure.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Status codes that indicate a transient condition.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

impl ErrorEnvelope {
    fn reason(&self) -> Option<String> {
        self.error
            .errors
            .iter()
            .find_map(|d| d.reason.clone())
            .or_else(|| self.error.status.clone())
    }
}
