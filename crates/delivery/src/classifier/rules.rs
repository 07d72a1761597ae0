/*!
 * Rule Engine
 *
 * Maps a failed delivery result to a decision via a prioritised,
 * configurable rule list. Always available; never fails a classification
 * (an unmatched failure conservatively retries).
 */

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use hookrelay_common::{Error, Result};
use hookrelay_domain::{CircuitState, Decision, ErrorType};

use crate::client::DeliveryResult;

/// Webhook-health context a classification is made against.
#[derive(Debug, Clone)]
pub struct ClassificationContext {
    pub webhook_id: Uuid,
    pub retry_count: i32,
    pub recent_failure_rate: f64,
    pub total_failures: i64,
    pub total_successes: i64,
    pub consecutive_failures: i32,
    pub circuit_breaker_state: CircuitState,
}

/// Where a classification came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationSource {
    /// Matched rule name, or `None` for the unmatched-failure default
    Rule(Option<String>),
    /// Remote advisor decision adopted
    Advisor,
}

/// Outcome of classifying one failed delivery attempt.
#[derive(Debug, Clone)]
pub struct Classification {
    pub decision: Decision,
    pub explanation: String,
    pub error_type: ErrorType,
    pub source: ClassificationSource,
}

/// One configurable classification rule.
///
/// All specified constraints must hold for the rule to match. Rules are
/// evaluated in descending `priority` order; ties keep list order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub exact_status_code: Option<i32>,
    #[serde(default)]
    pub status_code_min: Option<i32>,
    #[serde(default)]
    pub status_code_max: Option<i32>,
    /// Case-insensitive equality against the derived error type tag
    #[serde(default)]
    pub error_type_pattern: Option<String>,
    /// Regex matched against the raw error message
    #[serde(default)]
    pub error_message_pattern: Option<String>,
    pub decision: Decision,
    /// Template with `{statusCode}`, `{errorMessage}`, `{errorType}`
    /// placeholders
    pub explanation: String,
}

fn default_enabled() -> bool {
    true
}

struct CompiledRule {
    rule: ClassificationRule,
    message_regex: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, result: &DeliveryResult, error_type: ErrorType) -> bool {
        let rule = &self.rule;

        if let Some(exact) = rule.exact_status_code {
            if result.status_code != exact {
                return false;
            }
        }
        if let Some(min) = rule.status_code_min {
            if result.status_code < min {
                return false;
            }
        }
        if let Some(max) = rule.status_code_max {
            if result.status_code > max {
                return false;
            }
        }
        if let Some(pattern) = &rule.error_type_pattern {
            if !pattern.eq_ignore_ascii_case(&error_type.to_string()) {
                return false;
            }
        }
        if let Some(regex) = &self.message_regex {
            match &result.error_message {
                Some(message) => {
                    if !regex.is_match(message) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// Prioritised first-match rule engine.
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Compile and priority-sort a rule list.
    pub fn new(rules: Vec<ClassificationRule>) -> Result<Self> {
        let mut compiled = rules
            .into_iter()
            .map(|rule| {
                let message_regex = rule
                    .error_message_pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| {
                        Error::Config(format!("rule '{}': invalid regex: {e}", rule.name))
                    })?;
                Ok(CompiledRule {
                    rule,
                    message_regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Stable sort keeps list order for equal priorities
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));

        Ok(Self { rules: compiled })
    }

    pub fn with_default_rules() -> Self {
        Self::new(default_rules()).expect("default rules are valid")
    }

    /// Classify a failed delivery result. Never fails; an unmatched failure
    /// defaults to RETRY.
    pub fn classify(
        &self,
        result: &DeliveryResult,
        _context: &ClassificationContext,
    ) -> Classification {
        let error_type = derive_error_type(result.status_code, result.error_message.as_deref());

        for compiled in &self.rules {
            if !compiled.rule.enabled {
                continue;
            }
            if compiled.matches(result, error_type) {
                debug!(
                    rule = %compiled.rule.name,
                    status = result.status_code,
                    decision = %compiled.rule.decision,
                    "Rule matched"
                );
                return Classification {
                    decision: compiled.rule.decision,
                    explanation: render_template(&compiled.rule.explanation, result, error_type),
                    error_type,
                    source: ClassificationSource::Rule(Some(compiled.rule.name.clone())),
                };
            }
        }

        Classification {
            decision: Decision::Retry,
            explanation: render_template(
                "Unmatched failure (status {statusCode}); retrying conservatively",
                result,
                error_type,
            ),
            error_type,
            source: ClassificationSource::Rule(None),
        }
    }
}

/// Derive the error type tag from a delivery outcome.
pub fn derive_error_type(status_code: i32, error_message: Option<&str>) -> ErrorType {
    match status_code {
        429 => ErrorType::RateLimit,
        code if code >= 500 => ErrorType::ServerError,
        401 | 403 => ErrorType::AuthError,
        code if (400..500).contains(&code) => ErrorType::ClientError,
        code if code <= 0 => {
            let message = error_message.unwrap_or("").to_ascii_lowercase();
            if message.contains("timeout") {
                ErrorType::TimeoutError
            } else if message.contains("dns") {
                ErrorType::DnsError
            } else {
                ErrorType::NetworkError
            }
        }
        _ => ErrorType::UnknownError,
    }
}

fn render_template(template: &str, result: &DeliveryResult, error_type: ErrorType) -> String {
    template
        .replace("{statusCode}", &result.status_code.to_string())
        .replace(
            "{errorMessage}",
            result.error_message.as_deref().unwrap_or("none"),
        )
        .replace("{errorType}", &error_type.to_string())
}

/// The built-in rule list. Overridable via configuration.
pub fn default_rules() -> Vec<ClassificationRule> {
    fn rule(
        name: &str,
        priority: i32,
        decision: Decision,
        explanation: &str,
    ) -> ClassificationRule {
        ClassificationRule {
            name: name.to_string(),
            enabled: true,
            priority,
            exact_status_code: None,
            status_code_min: None,
            status_code_max: None,
            error_type_pattern: None,
            error_message_pattern: None,
            decision,
            explanation: explanation.to_string(),
        }
    }

    vec![
        ClassificationRule {
            exact_status_code: Some(429),
            ..rule(
                "rate-limit",
                100,
                Decision::Retry,
                "Subscriber is rate limiting (status {statusCode}); retrying with backoff",
            )
        },
        ClassificationRule {
            exact_status_code: Some(401),
            ..rule(
                "unauthorized",
                90,
                Decision::FailPermanent,
                "Authentication rejected (status {statusCode}); delivery will not be retried",
            )
        },
        ClassificationRule {
            exact_status_code: Some(403),
            ..rule(
                "forbidden",
                90,
                Decision::FailPermanent,
                "Access forbidden (status {statusCode}); delivery will not be retried",
            )
        },
        ClassificationRule {
            exact_status_code: Some(404),
            ..rule(
                "not-found",
                90,
                Decision::FailPermanent,
                "Endpoint not found (status {statusCode}); delivery will not be retried",
            )
        },
        ClassificationRule {
            exact_status_code: Some(400),
            ..rule(
                "bad-request",
                90,
                Decision::FailPermanent,
                "Subscriber rejected the payload (status {statusCode}); delivery will not be retried",
            )
        },
        ClassificationRule {
            exact_status_code: Some(451),
            ..rule(
                "legal-hold",
                90,
                Decision::PauseWebhook,
                "Endpoint unavailable for legal reasons (status {statusCode}); pausing webhook",
            )
        },
        ClassificationRule {
            exact_status_code: Some(408),
            ..rule(
                "request-timeout",
                80,
                Decision::Retry,
                "Request timeout (status {statusCode}); retrying with backoff",
            )
        },
        ClassificationRule {
            status_code_max: Some(0),
            ..rule(
                "network-error",
                70,
                Decision::Retry,
                "Network error ({errorType}): {errorMessage}; retrying with backoff",
            )
        },
        ClassificationRule {
            status_code_min: Some(500),
            status_code_max: Some(599),
            ..rule(
                "server-error",
                50,
                Decision::Retry,
                "Server error (status {statusCode}); retrying with backoff",
            )
        },
        ClassificationRule {
            status_code_min: Some(400),
            status_code_max: Some(499),
            ..rule(
                "client-error",
                10,
                Decision::FailPermanent,
                "Client error (status {statusCode}, {errorType}); delivery will not be retried",
            )
        },
    ]
}
