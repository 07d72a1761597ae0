/*!
 * Error Classifier
 *
 * Two-tier decision making for failed delivery attempts: an optional
 * remote advisor consulted opportunistically, then the local rule engine.
 */

pub mod advisor;
pub mod rules;

pub use advisor::{AdvisorClient, AdvisorRequest, AdvisorResponse};
pub use rules::{
    Classification, ClassificationContext, ClassificationRule, ClassificationSource, RuleEngine,
    default_rules, derive_error_type,
};

use hookrelay_domain::Decision;

use crate::client::DeliveryResult;

/// Classifies failed delivery results into {RETRY, FAIL_PERMANENT,
/// PAUSE_WEBHOOK, ESCALATE} with a human explanation.
pub struct ErrorClassifier {
    engine: RuleEngine,
    advisor: Option<AdvisorClient>,
    fallback_enabled: bool,
}

impl ErrorClassifier {
    pub fn new(engine: RuleEngine, advisor: Option<AdvisorClient>, fallback_enabled: bool) -> Self {
        Self {
            engine,
            advisor,
            fallback_enabled,
        }
    }

    /// Rule-engine-only classifier.
    pub fn rules_only(engine: RuleEngine) -> Self {
        Self::new(engine, None, true)
    }

    /// Classify a failed delivery result.
    ///
    /// The advisor is fail-open: whenever it yields nothing usable the rule
    /// engine decides (or, with fallback disabled, the conservative RETRY
    /// default applies).
    pub async fn classify(
        &self,
        result: &DeliveryResult,
        context: &ClassificationContext,
    ) -> Classification {
        if let Some(advisor) = &self.advisor {
            let error_type = derive_error_type(result.status_code, result.error_message.as_deref());
            if let Some(classification) = advisor.advise(result, error_type, context).await {
                return classification;
            }
            if !self.fallback_enabled {
                return Classification {
                    decision: Decision::Retry,
                    explanation: format!(
                        "Advisor unavailable for status {}; retrying conservatively",
                        result.status_code
                    ),
                    error_type,
                    source: ClassificationSource::Rule(None),
                };
            }
        }

        self.engine.classify(result, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookrelay_domain::CircuitState;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failed(status_code: i32) -> DeliveryResult {
        DeliveryResult {
            success: false,
            retryable: true,
            status_code,
            response_body: None,
            error_message: None,
            retry_after_seconds: None,
            duration_ms: 5,
        }
    }

    fn context() -> ClassificationContext {
        ClassificationContext {
            webhook_id: Uuid::new_v4(),
            retry_count: 2,
            recent_failure_rate: 0.5,
            total_failures: 10,
            total_successes: 10,
            consecutive_failures: 3,
            circuit_breaker_state: CircuitState::Closed,
        }
    }

    fn advisor_for(server: &MockServer, threshold: f64) -> AdvisorClient {
        AdvisorClient::new(server.uri(), Duration::from_millis(500), threshold).unwrap()
    }

    #[tokio::test]
    async fn test_confident_advisor_decision_is_adopted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "error_signature": {"http_status_code": 500, "error_type": "SERVER_ERROR"},
                "retry_count": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "decision": "PAUSE_WEBHOOK",
                "confidence_score": 0.92,
                "explanation": "Endpoint has been failing for all subscribers",
                "fallback_used": false,
                "evidence": {
                    "sample_size": 120,
                    "success_rate": 0.01,
                    "decision_type": "PAUSE_WEBHOOK",
                    "confidence_score": 0.92
                }
            })))
            .mount(&server)
            .await;

        let classifier = ErrorClassifier::new(
            RuleEngine::with_default_rules(),
            Some(advisor_for(&server, 0.6)),
            true,
        );

        let classification = classifier.classify(&failed(500), &context()).await;
        assert_eq!(classification.decision, Decision::PauseWebhook);
        assert_eq!(classification.source, ClassificationSource::Advisor);
        assert!(classification.explanation.contains("all subscribers"));
    }

    #[tokio::test]
    async fn test_low_confidence_falls_back_to_rules() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "decision": "FAIL_PERMANENT",
                "confidence_score": 0.3,
                "explanation": "not sure",
                "fallback_used": true
            })))
            .mount(&server)
            .await;

        let classifier = ErrorClassifier::new(
            RuleEngine::with_default_rules(),
            Some(advisor_for(&server, 0.6)),
            true,
        );

        // Rules say 500 is RETRY
        let classification = classifier.classify(&failed(500), &context()).await;
        assert_eq!(classification.decision, Decision::Retry);
        assert!(matches!(
            classification.source,
            ClassificationSource::Rule(Some(_))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_decision_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "decision": "SHRUG",
                "confidence_score": 0.99,
                "explanation": "?"
            })))
            .mount(&server)
            .await;

        let classifier = ErrorClassifier::new(
            RuleEngine::with_default_rules(),
            Some(advisor_for(&server, 0.6)),
            true,
        );

        let classification = classifier.classify(&failed(404), &context()).await;
        assert_eq!(classification.decision, Decision::FailPermanent);
    }

    #[tokio::test]
    async fn test_unreachable_advisor_falls_back() {
        // Nothing listens on this port
        let advisor =
            AdvisorClient::new("http://127.0.0.1:9", Duration::from_millis(200), 0.6).unwrap();
        let classifier =
            ErrorClassifier::new(RuleEngine::with_default_rules(), Some(advisor), true);

        let classification = classifier.classify(&failed(404), &context()).await;
        assert_eq!(classification.decision, Decision::FailPermanent);
    }

    #[tokio::test]
    async fn test_fallback_disabled_retries_conservatively() {
        let advisor =
            AdvisorClient::new("http://127.0.0.1:9", Duration::from_millis(200), 0.6).unwrap();
        let classifier =
            ErrorClassifier::new(RuleEngine::with_default_rules(), Some(advisor), false);

        let classification = classifier.classify(&failed(404), &context()).await;
        assert_eq!(classification.decision, Decision::Retry);
    }
}
