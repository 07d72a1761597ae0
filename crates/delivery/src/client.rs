/*!
 * Delivery Client
 *
 * Performs one HTTP POST attempt against a subscriber endpoint and
 * normalises the outcome into a structured `DeliveryResult`.
 */

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use hookrelay_domain::Webhook;

const USER_AGENT: &str = concat!("hookrelay-delivery/", env!("CARGO_PKG_VERSION"));

/// Maximum number of response-body characters retained for auditing.
const MAX_BODY_CHARS: usize = 10_000;

/// Normalised outcome of a single delivery attempt.
///
/// A `status_code` of 0 means no HTTP response was received (transport
/// failure, timeout, DNS).
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub retryable: bool,
    pub status_code: i32,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub retry_after_seconds: Option<i64>,
    pub duration_ms: u64,
}

/// HTTP client for webhook deliveries.
///
/// Never mutates Webhook or Event state; the worker owns all persistence.
pub struct DeliveryClient {
    client: Client,
}

impl DeliveryClient {
    /// Create a new delivery client.
    ///
    /// # Arguments
    ///
    /// * `connect_timeout` - TCP connect timeout (default 5s)
    /// * `read_timeout` - Whole-request timeout (default 10s)
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// POST the payload verbatim to the webhook URL.
    pub async fn deliver(&self, webhook: &Webhook, payload: &str) -> DeliveryResult {
        let start = Instant::now();

        debug!(
            webhook_id = %webhook.id,
            url = %&webhook.url[..60.min(webhook.url.len())],
            "Sending delivery attempt"
        );

        let response_result = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .body(payload.to_string())
            .send()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;

        match response_result {
            Ok(response) => {
                let status_code = response.status().as_u16() as i32;
                let success = response.status().is_success();

                // Retry-After is honoured on rate limits and server errors,
                // integer-seconds form only.
                let retry_after_seconds = if status_code == 429 || status_code >= 500 {
                    parse_retry_after(response.headers())
                } else {
                    None
                };

                let response_body = response
                    .text()
                    .await
                    .ok()
                    .map(|b| b.chars().take(MAX_BODY_CHARS).collect::<String>());

                let retryable = match status_code {
                    200..=299 => false,
                    429 => true,
                    400..=499 => false,
                    500..=599 => true,
                    // 1xx/3xx should not normally surface; retry to be safe
                    _ => true,
                };

                if success {
                    info!(
                        webhook_id = %webhook.id,
                        status = status_code,
                        duration_ms,
                        "Delivery succeeded"
                    );
                } else {
                    warn!(
                        webhook_id = %webhook.id,
                        status = status_code,
                        duration_ms,
                        retryable,
                        "Delivery failed"
                    );
                }

                DeliveryResult {
                    success,
                    retryable,
                    status_code,
                    response_body,
                    error_message: None,
                    retry_after_seconds,
                    duration_ms,
                }
            }
            Err(e) => {
                let error_message = describe_transport_error(&e);

                warn!(
                    webhook_id = %webhook.id,
                    error = %error_message,
                    duration_ms,
                    "Delivery transport failure"
                );

                DeliveryResult {
                    success: false,
                    retryable: true,
                    status_code: 0,
                    response_body: None,
                    error_message: Some(error_message),
                    retry_after_seconds: None,
                    duration_ms,
                }
            }
        }
    }
}

/// Parse an integer-seconds `Retry-After` header. The HTTP-date form is
/// ignored.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs > 0)
}

/// Flatten a reqwest error into a cause string, keeping the source chain so
/// the classifier can see "timeout"/"dns" markers.
fn describe_transport_error(e: &reqwest::Error) -> String {
    let mut message = if e.is_timeout() {
        format!("timeout: {e}")
    } else if e.is_connect() {
        format!("connect error: {e}")
    } else {
        e.to_string()
    };

    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> DeliveryClient {
        DeliveryClient::new(Duration::from_secs(2), Duration::from_secs(2)).unwrap()
    }

    fn webhook_for(url: String) -> Webhook {
        Webhook::new(url, json!({}))
    }

    #[tokio::test]
    async fn test_2xx_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"a":1}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let webhook = webhook_for(format!("{}/hook", server.uri()));
        let result = test_client().deliver(&webhook, r#"{"a":1}"#).await;

        assert!(result.success);
        assert!(!result.retryable);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.response_body.as_deref(), Some("ok"));
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_5xx_is_retryable_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let webhook = webhook_for(format!("{}/hook", server.uri()));
        let result = test_client().deliver(&webhook, "{}").await;

        assert!(!result.success);
        assert!(result.retryable);
        assert_eq!(result.status_code, 503);
        assert_eq!(result.retry_after_seconds, Some(30));
    }

    #[tokio::test]
    async fn test_429_extracts_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let webhook = webhook_for(format!("{}/hook", server.uri()));
        let result = test_client().deliver(&webhook, "{}").await;

        assert!(result.retryable);
        assert_eq!(result.status_code, 429);
        assert_eq!(result.retry_after_seconds, Some(7));
    }

    #[tokio::test]
    async fn test_404_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let webhook = webhook_for(format!("{}/hook", server.uri()));
        let result = test_client().deliver(&webhook, "{}").await;

        assert!(!result.success);
        assert!(!result.retryable);
        assert_eq!(result.status_code, 404);
    }

    #[tokio::test]
    async fn test_http_date_retry_after_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("Retry-After", "Wed, 21 Oct 2026 07:28:00 GMT"),
            )
            .mount(&server)
            .await;

        let webhook = webhook_for(format!("{}/hook", server.uri()));
        let result = test_client().deliver(&webhook, "{}").await;

        assert_eq!(result.retry_after_seconds, None);
    }

    #[tokio::test]
    async fn test_transport_failure_has_status_zero() {
        // Nothing listens on this port
        let webhook = webhook_for("http://127.0.0.1:9/hook".to_string());
        let result = test_client().deliver(&webhook, "{}").await;

        assert!(!result.success);
        assert!(result.retryable);
        assert_eq!(result.status_code, 0);
        assert!(result.error_message.is_some());
    }
}
