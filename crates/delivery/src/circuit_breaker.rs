/*!
 * Circuit Breaker for Endpoint Health Tracking
 *
 * Prevents hammering unhealthy endpoints with requests.
 *
 * The breaker exposes pure transitions on the webhook's persisted health
 * fields; the delivery worker owns persistence and serialises updates per
 * webhook.
 */

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use hookrelay_domain::{CircuitState, Webhook};

/// Per-webhook CLOSED/OPEN/HALF_OPEN state machine.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Consecutive failures before the circuit opens
    failure_threshold: u32,
    /// How long an open circuit blocks requests before probing recovery
    cooldown: Duration,
    /// Probes admitted while HALF_OPEN
    half_open_test_limit: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration, half_open_test_limit: u32) -> Self {
        Self {
            failure_threshold,
            cooldown,
            half_open_test_limit,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// When an open circuit next admits a probe.
    pub fn reopens_at(&self, webhook: &Webhook) -> Option<DateTime<Utc>> {
        webhook
            .circuit_opened_at
            .map(|opened_at| opened_at + self.cooldown_chrono())
    }

    /// Check whether a request to this webhook may proceed.
    ///
    /// An OPEN circuit whose cooldown has elapsed transitions to HALF_OPEN
    /// here; the caller must persist the webhook afterwards so the
    /// transition survives.
    pub fn allow_request(&self, webhook: &mut Webhook, now: DateTime<Utc>) -> bool {
        match webhook.circuit_state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if webhook.half_open_probes < self.half_open_test_limit as i32 {
                    webhook.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => {
                if let Some(opened_at) = webhook.circuit_opened_at {
                    if now >= opened_at + self.cooldown_chrono() {
                        debug!(
                            webhook_id = %webhook.id,
                            "Circuit breaker transitioning to HALF_OPEN"
                        );
                        webhook.circuit_state = CircuitState::HalfOpen;
                        webhook.half_open_probes = 1;
                        true
                    } else {
                        false
                    }
                } else {
                    // No opened_at timestamp? Allow the request
                    true
                }
            }
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&self, webhook: &mut Webhook) {
        match webhook.circuit_state {
            CircuitState::Closed => {
                webhook.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                debug!(
                    webhook_id = %webhook.id,
                    "Circuit breaker closing (probe succeeded)"
                );
                webhook.circuit_state = CircuitState::Closed;
                webhook.circuit_opened_at = None;
                webhook.consecutive_failures = 0;
                webhook.half_open_probes = 0;
            }
            // Success without an admitted probe: must probe via HALF_OPEN first
            CircuitState::Open => {}
        }
    }

    /// Record a failed delivery.
    pub fn record_failure(&self, webhook: &mut Webhook, now: DateTime<Utc>) {
        match webhook.circuit_state {
            CircuitState::Closed => {
                webhook.consecutive_failures += 1;
                if webhook.consecutive_failures >= self.failure_threshold as i32 {
                    warn!(
                        webhook_id = %webhook.id,
                        consecutive_failures = webhook.consecutive_failures,
                        "Circuit breaker OPENING"
                    );
                    webhook.circuit_state = CircuitState::Open;
                    webhook.circuit_opened_at = Some(now);
                    webhook.half_open_probes = 0;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    webhook_id = %webhook.id,
                    "Circuit breaker RE-OPENING (probe failed)"
                );
                webhook.consecutive_failures += 1;
                webhook.circuit_state = CircuitState::Open;
                webhook.circuit_opened_at = Some(now);
                webhook.half_open_probes = 0;
            }
            // Requests are blocked while OPEN; nothing to count
            CircuitState::Open => {}
        }
    }

    /// Operator intervention: return the breaker to CLOSED and clear
    /// counters.
    pub fn reset(&self, webhook: &mut Webhook) {
        debug!(webhook_id = %webhook.id, "Circuit breaker reset");
        webhook.circuit_state = CircuitState::Closed;
        webhook.consecutive_failures = 0;
        webhook.half_open_probes = 0;
        webhook.circuit_opened_at = None;
    }

    fn cooldown_chrono(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.cooldown.as_millis() as i64)
    }
}
