/*!
 * Prometheus Metrics for the Delivery Service
 *
 * Exposed on the /metrics endpoint for Prometheus scraping.
 */

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, opts, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

lazy_static! {
    /// Delivery attempts counter
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("hookrelay_delivery_attempts_total", "Total number of delivery attempts"),
        &["webhook", "success"]
    )
    .expect("metric can be created");

    /// Delivery duration histogram
    pub static ref DELIVERY_DURATION: HistogramVec = register_histogram_vec!(
        "hookrelay_delivery_duration_seconds",
        "Webhook delivery duration in seconds",
        &["webhook"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("metric can be created");

    /// HTTP status codes received from subscribers
    pub static ref HTTP_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("hookrelay_http_responses_total", "Total HTTP responses by status code"),
        &["status_code"]
    )
    .expect("metric can be created");

    /// Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)
    pub static ref CIRCUIT_BREAKER_STATE: IntGaugeVec = register_int_gauge_vec!(
        opts!("hookrelay_circuit_breaker_state", "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)"),
        &["webhook"]
    )
    .expect("metric can be created");

    /// Events consumed from the queue
    pub static ref EVENTS_CONSUMED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("hookrelay_events_consumed_total", "Total events consumed from the delivery queue"),
        &["worker"]
    )
    .expect("metric can be created");

    /// Current delivery queue depth
    pub static ref EVENT_QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        opts!("hookrelay_event_queue_depth", "Current delivery queue depth"),
        &["queue"]
    )
    .expect("metric can be created");

    /// Retry attempts
    pub static ref RETRY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("hookrelay_retry_attempts_total", "Total number of retry attempts"),
        &["webhook"]
    )
    .expect("metric can be created");

    /// Classifier decisions
    pub static ref CLASSIFIER_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("hookrelay_classifier_decisions_total", "Total classifier decisions by outcome"),
        &["decision", "source"]
    )
    .expect("metric can be created");
}

/// Render metrics in Prometheus text format.
pub fn render_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
