use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Waiting in the queue
    Pending,
    /// A worker lane is attempting delivery
    Processing,
    /// A retry has been scheduled
    RetryPending,
    /// Delivered (terminal)
    Success,
    /// Permanently failed (terminal)
    Failure,
    /// Suspended until the webhook is resumed
    Paused,
}

impl EventStatus {
    /// SUCCESS and FAILURE are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::RetryPending => write!(f, "RETRY_PENDING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Paused => write!(f, "PAUSED"),
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "RETRY_PENDING" => Ok(Self::RetryPending),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "PAUSED" => Ok(Self::Paused),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// One deliverable payload bound to a webhook; the unit of work of the
/// queue and the delivery worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub webhook_id: Uuid,
    /// Payload sent verbatim as the POST body, normally JSON.
    pub payload: String,
    pub status: EventStatus,
    pub retry_count: i32,
    /// Last explanation recorded for a failed or paused event.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn new(webhook_id: Uuid, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            payload: payload.into(),
            status: EventStatus::Pending,
            retry_count: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_pending() {
        let event = Event::new(Uuid::new_v4(), r#"{"a":1}"#);
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert!(event.failure_reason.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(EventStatus::Success.is_terminal());
        assert!(EventStatus::Failure.is_terminal());
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::RetryPending.is_terminal());
        assert!(!EventStatus::Paused.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            EventStatus::Pending,
            EventStatus::Processing,
            EventStatus::RetryPending,
            EventStatus::Success,
            EventStatus::Failure,
            EventStatus::Paused,
        ] {
            let parsed: EventStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
