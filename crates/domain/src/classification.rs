use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What to do about a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Schedule another attempt with backoff
    Retry,
    /// Give up on this event; no further attempts
    FailPermanent,
    /// Suspend the whole webhook for the pause window
    PauseWebhook,
    /// Give up and raise to an operator
    Escalate,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "RETRY"),
            Self::FailPermanent => write!(f, "FAIL_PERMANENT"),
            Self::PauseWebhook => write!(f, "PAUSE_WEBHOOK"),
            Self::Escalate => write!(f, "ESCALATE"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RETRY" => Ok(Self::Retry),
            "FAIL_PERMANENT" => Ok(Self::FailPermanent),
            "PAUSE_WEBHOOK" => Ok(Self::PauseWebhook),
            "ESCALATE" => Ok(Self::Escalate),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

/// Derived tag describing the kind of failure, used in explanations and as
/// advisor input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    RateLimit,
    ServerError,
    AuthError,
    ClientError,
    TimeoutError,
    DnsError,
    NetworkError,
    UnknownError,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::AuthError => write!(f, "AUTH_ERROR"),
            Self::ClientError => write!(f, "CLIENT_ERROR"),
            Self::TimeoutError => write!(f, "TIMEOUT_ERROR"),
            Self::DnsError => write!(f, "DNS_ERROR"),
            Self::NetworkError => write!(f, "NETWORK_ERROR"),
            Self::UnknownError => write!(f, "UNKNOWN_ERROR"),
        }
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RATE_LIMIT" => Ok(Self::RateLimit),
            "SERVER_ERROR" => Ok(Self::ServerError),
            "AUTH_ERROR" => Ok(Self::AuthError),
            "CLIENT_ERROR" => Ok(Self::ClientError),
            "TIMEOUT_ERROR" => Ok(Self::TimeoutError),
            "DNS_ERROR" => Ok(Self::DnsError),
            "NETWORK_ERROR" => Ok(Self::NetworkError),
            "UNKNOWN_ERROR" => Ok(Self::UnknownError),
            other => Err(format!("unknown error type: {other}")),
        }
    }
}

/// Append-only audit row written after every failed delivery attempt.
///
/// A status code of 0 (or below) encodes a network/unknown failure where no
/// HTTP response was received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub id: Uuid,
    pub event_id: Uuid,
    pub webhook_id: Uuid,
    pub status_code: i32,
    pub error_message: Option<String>,
    pub decision: Decision,
    pub explanation: String,
    pub error_type: ErrorType,
    pub retry_after_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ErrorClassification {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        event_id: Uuid,
        webhook_id: Uuid,
        status_code: i32,
        error_message: Option<String>,
        decision: Decision,
        explanation: impl Into<String>,
        error_type: ErrorType,
        retry_after_seconds: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            webhook_id,
            status_code,
            error_message,
            decision,
            explanation: explanation.into(),
            error_type,
            retry_after_seconds,
            created_at: Utc::now(),
        }
    }
}
