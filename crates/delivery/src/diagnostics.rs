/*!
 * Diagnostics
 *
 * Human-readable explanations, per-webhook health summaries, and
 * recommendations derived from recent classifications. Pure functions of
 * their inputs.
 */

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use hookrelay_domain::{CircuitState, Decision, ErrorClassification, ErrorType, Webhook};

use crate::classifier::Classification;
use crate::client::DeliveryResult;

/// How many classifications the recommendation window looks at.
const RECOMMENDATION_WINDOW: usize = 10;

/// Per-webhook health report for operator surfacing.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub webhook_id: Uuid,
    pub url: String,
    pub circuit_state: CircuitState,
    pub success_rate: Option<f64>,
    pub total_successes: i64,
    pub total_failures: i64,
    pub consecutive_failures: i32,
    pub paused_until: Option<DateTime<Utc>>,
    pub is_disabled: bool,
    pub recent_errors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// One-line human explanation of a failed attempt, keyed on status and
/// decision.
pub fn explain_failure(classification: &Classification, result: &DeliveryResult) -> String {
    let status_desc = if result.status_code > 0 {
        format!("HTTP {}", result.status_code)
    } else {
        format!(
            "no response ({})",
            result.error_message.as_deref().unwrap_or("unknown cause")
        )
    };

    match classification.decision {
        Decision::Retry => format!(
            "{status_desc}: {}; another attempt will be made",
            classification.explanation
        ),
        Decision::FailPermanent => format!(
            "{status_desc}: {}; delivery abandoned",
            classification.explanation
        ),
        Decision::PauseWebhook => format!(
            "{status_desc}: {}; deliveries to this endpoint are suspended",
            classification.explanation
        ),
        Decision::Escalate => format!(
            "{status_desc}: {}; escalated to operators",
            classification.explanation
        ),
    }
}

/// Render one audit row as an error line for the health summary.
pub fn format_error_line(row: &ErrorClassification) -> String {
    format!(
        "{} [{}] status={} decision={}: {}",
        row.created_at.to_rfc3339(),
        row.error_type,
        row.status_code,
        row.decision,
        row.explanation
    )
}

/// Build the health summary for a webhook from its counters and its most
/// recent classifications (newest first).
pub fn health_summary(
    webhook: &Webhook,
    recent: &[ErrorClassification],
    max_error_lines: usize,
) -> HealthSummary {
    HealthSummary {
        webhook_id: webhook.id,
        url: webhook.url.clone(),
        circuit_state: webhook.circuit_state,
        success_rate: webhook.success_rate(),
        total_successes: webhook.total_successes,
        total_failures: webhook.total_failures,
        consecutive_failures: webhook.consecutive_failures,
        paused_until: webhook.paused_until,
        is_disabled: webhook.is_disabled,
        recent_errors: recent
            .iter()
            .take(max_error_lines)
            .map(format_error_line)
            .collect(),
        recommendations: recommendations(webhook, recent),
    }
}

/// Simple counting heuristics over the last 10 classifications.
pub fn recommendations(webhook: &Webhook, recent: &[ErrorClassification]) -> Vec<String> {
    let window = &recent[..RECOMMENDATION_WINDOW.min(recent.len())];

    let auth_errors = window
        .iter()
        .filter(|row| row.error_type == ErrorType::AuthError)
        .count();
    let rate_limits = window
        .iter()
        .filter(|row| row.error_type == ErrorType::RateLimit)
        .count();
    let server_errors = window
        .iter()
        .filter(|row| row.error_type == ErrorType::ServerError)
        .count();

    let mut recommendations = Vec::new();
    if auth_errors >= 3 {
        recommendations.push(
            "Repeated authentication failures; review the endpoint's credentials".to_string(),
        );
    }
    if rate_limits >= 2 {
        recommendations.push(
            "Subscriber is rate limiting; lower the delivery rate or raise subscriber limits"
                .to_string(),
        );
    }
    if server_errors >= 5 {
        recommendations
            .push("Subscriber endpoint looks unhealthy; ask the owner to check it".to_string());
    }
    if webhook.circuit_state == CircuitState::Open {
        recommendations.push(
            "Circuit breaker is open; deliveries to this endpoint are temporarily disabled"
                .to_string(),
        );
    }
    recommendations
}
