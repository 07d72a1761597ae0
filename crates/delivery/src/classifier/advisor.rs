/*!
 * Remote Advisor Client
 *
 * Consults a learning-based classifier over HTTP. Strictly fail-open: any
 * transport failure, parse failure, or low-confidence answer yields `None`
 * and the caller falls back to the local rule engine.
 */

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use hookrelay_domain::{Decision, ErrorType};

use crate::classifier::rules::{Classification, ClassificationContext, ClassificationSource};
use crate::client::DeliveryResult;

/// Normalised error signature sent to the advisor.
#[derive(Debug, Serialize)]
pub struct ErrorSignature {
    pub http_status_code: i32,
    pub error_type: String,
    pub error_message_pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookHealth {
    pub webhook_id: Uuid,
    pub total_failures: i64,
    pub total_successes: i64,
    pub consecutive_failures: i32,
    pub circuit_breaker_state: String,
}

#[derive(Debug, Serialize)]
pub struct AdvisorRequest {
    pub error_signature: ErrorSignature,
    pub retry_count: i32,
    pub recent_failure_rate: f64,
    pub webhook_health: WebhookHealth,
}

#[derive(Debug, Deserialize)]
pub struct AdvisorEvidence {
    #[serde(default)]
    pub sample_size: Option<i64>,
    #[serde(default)]
    pub success_rate: Option<f64>,
    #[serde(default)]
    pub decision_type: Option<String>,
    #[serde(default)]
    pub similarity_score: Option<f64>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AdvisorResponse {
    pub decision: String,
    pub confidence_score: f64,
    pub explanation: String,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub evidence: Option<AdvisorEvidence>,
}

/// HTTP client for the advisor endpoint.
pub struct AdvisorClient {
    client: Client,
    url: String,
    confidence_threshold: f64,
}

impl AdvisorClient {
    pub fn new(url: impl Into<String>, timeout: Duration, confidence_threshold: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create advisor HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            confidence_threshold,
        })
    }

    /// Ask the advisor for a decision. Returns `None` whenever the local
    /// rule engine should decide instead.
    pub async fn advise(
        &self,
        result: &DeliveryResult,
        error_type: ErrorType,
        context: &ClassificationContext,
    ) -> Option<Classification> {
        let request = AdvisorRequest {
            error_signature: ErrorSignature {
                http_status_code: result.status_code,
                error_type: error_type.to_string(),
                error_message_pattern: result.error_message.clone(),
            },
            retry_count: context.retry_count,
            recent_failure_rate: context.recent_failure_rate,
            webhook_health: WebhookHealth {
                webhook_id: context.webhook_id,
                total_failures: context.total_failures,
                total_successes: context.total_successes,
                consecutive_failures: context.consecutive_failures,
                circuit_breaker_state: context.circuit_breaker_state.to_string(),
            },
        };

        let response = match self.client.post(&self.url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Advisor unreachable; falling back to rules");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(
                status = response.status().as_u16(),
                "Advisor returned non-success; falling back to rules"
            );
            return None;
        }

        let advice: AdvisorResponse = match response.json().await {
            Ok(advice) => advice,
            Err(e) => {
                warn!(error = %e, "Advisor response unparseable; falling back to rules");
                return None;
            }
        };

        if advice.confidence_score < self.confidence_threshold {
            debug!(
                confidence = advice.confidence_score,
                threshold = self.confidence_threshold,
                "Advisor confidence below threshold; falling back to rules"
            );
            return None;
        }

        let decision: Decision = match advice.decision.parse() {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Advisor decision unparseable; falling back to rules");
                return None;
            }
        };

        debug!(
            decision = %decision,
            confidence = advice.confidence_score,
            fallback_used = advice.fallback_used,
            "Adopting advisor decision"
        );

        Some(Classification {
            decision,
            explanation: advice.explanation,
            error_type,
            source: ClassificationSource::Advisor,
        })
    }
}
