use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Circuit breaker state for a webhook endpoint.
///
/// Persisted as an enumerated string ("CLOSED", "OPEN", "HALF_OPEN").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - endpoint is healthy
    Closed,
    /// Too many failures - waiting before retry
    Open,
    /// Testing if endpoint recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(Self::Closed),
            "OPEN" => Ok(Self::Open),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            other => Err(format!("unknown circuit state: {other}")),
        }
    }
}

/// A subscriber endpoint registered with a target URL and opaque metadata.
///
/// The endpoint-health fields (`circuit_state` through `is_disabled`) are
/// owned by the delivery worker and mutated only after delivery attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    pub metadata: serde_json::Value,

    // Endpoint health, owned by the delivery core
    pub circuit_state: CircuitState,
    pub consecutive_failures: i32,
    /// Probes admitted since the breaker last entered HALF_OPEN.
    pub half_open_probes: i32,
    pub circuit_opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub total_successes: i64,
    pub total_failures: i64,
    pub paused_until: Option<DateTime<Utc>>,
    pub is_disabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Create a new webhook with health fields at their initial values.
    pub fn new(url: impl Into<String>, metadata: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            metadata,
            circuit_state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_probes: 0,
            circuit_opened_at: None,
            last_failure_at: None,
            total_successes: 0,
            total_failures: 0,
            paused_until: None,
            is_disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if deliveries to this webhook are currently suspended.
    pub fn is_paused_at(&self, now: DateTime<Utc>) -> bool {
        self.is_disabled || self.paused_until.is_some_and(|until| until > now)
    }

    /// Fraction of attempts that succeeded, or `None` before the first attempt.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            None
        } else {
            Some(self.total_successes as f64 / total as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_webhook_starts_healthy() {
        let webhook = Webhook::new("https://example.com/hook", json!({"team": "payments"}));

        assert_eq!(webhook.circuit_state, CircuitState::Closed);
        assert_eq!(webhook.consecutive_failures, 0);
        assert!(webhook.circuit_opened_at.is_none());
        assert!(!webhook.is_paused_at(Utc::now()));
    }

    #[test]
    fn test_circuit_state_round_trip() {
        for state in [
            CircuitState::Closed,
            CircuitState::Open,
            CircuitState::HalfOpen,
        ] {
            let parsed: CircuitState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("half-open".parse::<CircuitState>().is_err());
    }

    #[test]
    fn test_success_rate() {
        let mut webhook = Webhook::new("https://example.com/hook", json!({}));
        assert!(webhook.success_rate().is_none());

        webhook.total_successes = 3;
        webhook.total_failures = 1;
        assert_eq!(webhook.success_rate(), Some(0.75));
    }
}
