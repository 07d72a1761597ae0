/*!
 * Delivery worker integration tests
 *
 * Exercise the full per-event state machine against a wiremock subscriber
 * with in-memory repositories and a real worker pool.
 */

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use hookrelay_delivery::config::DeliveryConfig;
use hookrelay_delivery::queue::{EventQueue, InMemoryQueue};
use hookrelay_delivery::repository::{
    EventRepository, InMemoryClassificationRepository, InMemoryEventRepository,
    InMemoryWebhookRepository, WebhookRepository,
};
use hookrelay_delivery::worker::DeliveryService;
use hookrelay_domain::{CircuitState, Decision, ErrorType, Event, EventStatus, Webhook};

struct Harness {
    service: Arc<DeliveryService>,
    queue: Arc<InMemoryQueue>,
    webhooks: InMemoryWebhookRepository,
    events: InMemoryEventRepository,
    classifications: InMemoryClassificationRepository,
}

async fn start_harness(config: DeliveryConfig) -> Harness {
    let queue = Arc::new(InMemoryQueue::new());
    let webhooks = InMemoryWebhookRepository::new();
    let events = InMemoryEventRepository::new();
    let classifications = InMemoryClassificationRepository::new();

    let service = DeliveryService::new(
        config,
        Arc::clone(&queue) as Arc<dyn EventQueue>,
        Arc::new(webhooks.clone()),
        Arc::new(events.clone()),
        Arc::new(classifications.clone()),
    )
    .unwrap();
    service.start().await;

    Harness {
        service,
        queue,
        webhooks,
        events,
        classifications,
    }
}

fn fast_config() -> DeliveryConfig {
    DeliveryConfig {
        worker_threads: 2,
        poll_interval_ms: 10,
        retry_base_delay_ms: 20,
        retry_max_delay_ms: 200,
        advisor_enabled: false,
        ..Default::default()
    }
}

async fn wait_for_status(
    events: &InMemoryEventRepository,
    event_id: Uuid,
    expected: EventStatus,
    timeout: Duration,
) -> Event {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(event) = events.find_by_id(event_id).await.unwrap() {
            if event.status == expected {
                return event;
            }
        }
        assert!(
            Instant::now() < deadline,
            "event {event_id} did not reach {expected} within {timeout:?}"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_happy_path_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = start_harness(fast_config()).await;

    let webhook = Webhook::new(format!("{}/ok", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    let event = Event::new(webhook.id, r#"{"a":1}"#);
    let event_id = event.id;
    harness.service.submit(event).await.unwrap();

    let done = wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Success,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(done.retry_count, 0);
    let webhook = harness
        .webhooks
        .find_by_id(webhook.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(webhook.total_successes, 1);
    assert_eq!(webhook.total_failures, 0);
    assert_eq!(webhook.circuit_state, CircuitState::Closed);
    assert!(harness.classifications.all().await.is_empty());

    harness.service.stop().await;
}

#[tokio::test]
async fn test_exponential_retry_then_success() {
    let server = MockServer::start().await;
    // Three 500s, then 200 for everything after
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = start_harness(fast_config()).await;

    let webhook = Webhook::new(format!("{}/flaky", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    let event = Event::new(webhook.id, "{}");
    let event_id = event.id;
    harness.service.submit(event).await.unwrap();

    let done = wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Success,
        Duration::from_secs(10),
    )
    .await;

    assert_eq!(done.retry_count, 3);

    let rows = harness.classifications.all().await;
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.decision, Decision::Retry);
        assert_eq!(row.error_type, ErrorType::ServerError);
        assert_eq!(row.status_code, 500);
    }

    let webhook = harness
        .webhooks
        .find_by_id(webhook.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(webhook.total_failures, 3);
    assert_eq!(webhook.total_successes, 1);
    // Success resets the consecutive counter
    assert_eq!(webhook.consecutive_failures, 0);

    harness.service.stop().await;
}

#[tokio::test]
async fn test_retry_after_is_honoured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = start_harness(fast_config()).await;

    let webhook = Webhook::new(format!("{}/limited", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    let event = Event::new(webhook.id, "{}");
    let event_id = event.id;
    let started = Instant::now();
    harness.service.submit(event).await.unwrap();

    let done = wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Success,
        Duration::from_secs(10),
    )
    .await;

    assert_eq!(done.retry_count, 1);
    // The retry must not fire before the subscriber's hint
    assert!(started.elapsed() >= Duration::from_secs(1));

    let rows = harness.classifications.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].error_type, ErrorType::RateLimit);
    assert_eq!(rows[0].retry_after_seconds, Some(1));

    harness.service.stop().await;
}

#[tokio::test]
async fn test_circuit_opens_and_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    // One lane so failures land sequentially; no retries so each event
    // records exactly one failure
    let config = DeliveryConfig {
        worker_threads: 1,
        max_retries: 0,
        circuit_failure_threshold: 3,
        circuit_cooldown_secs: 1,
        ..fast_config()
    };
    let harness = start_harness(config).await;

    let webhook = Webhook::new(format!("{}/down", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    // Three failing events open the circuit
    for _ in 0..3 {
        let event = Event::new(webhook.id, "{}");
        let event_id = event.id;
        harness.service.submit(event).await.unwrap();
        wait_for_status(
            &harness.events,
            event_id,
            EventStatus::Failure,
            Duration::from_secs(5),
        )
        .await;
    }

    let opened = harness
        .webhooks
        .find_by_id(webhook.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opened.circuit_state, CircuitState::Open);
    assert!(opened.circuit_opened_at.is_some());

    // The next event is deferred without an HTTP attempt, re-enqueued after
    // the cooldown, probed through HALF_OPEN, and succeeds
    let requests_before = server.received_requests().await.unwrap().len();
    assert_eq!(requests_before, 3);

    let event = Event::new(webhook.id, "{}");
    let event_id = event.id;
    harness.service.submit(event).await.unwrap();

    // While the cooldown runs, the event is deferred and no POST goes out
    wait_for_status(
        &harness.events,
        event_id,
        EventStatus::RetryPending,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    let done = wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Success,
        Duration::from_secs(10),
    )
    .await;
    assert_eq!(done.retry_count, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);

    let closed = harness
        .webhooks
        .find_by_id(webhook.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.circuit_state, CircuitState::Closed);
    assert!(closed.circuit_opened_at.is_none());

    harness.service.stop().await;
}

#[tokio::test]
async fn test_permanent_404() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let harness = start_harness(fast_config()).await;

    let webhook = Webhook::new(format!("{}/gone", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    let event = Event::new(webhook.id, "{}");
    let event_id = event.id;
    harness.service.submit(event).await.unwrap();

    let done = wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Failure,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(done.retry_count, 0);
    assert!(done.failure_reason.unwrap().contains("not found"));

    let rows = harness.classifications.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].decision, Decision::FailPermanent);
    assert_eq!(rows[0].error_type, ErrorType::ClientError);

    // Exactly one attempt
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    harness.service.stop().await;
}

#[tokio::test]
async fn test_pause_on_451_and_resume() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(451))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = start_harness(fast_config()).await;

    let webhook = Webhook::new(format!("{}/held", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    let first = Event::new(webhook.id, "{}");
    let first_id = first.id;
    harness.service.submit(first).await.unwrap();

    wait_for_status(
        &harness.events,
        first_id,
        EventStatus::Paused,
        Duration::from_secs(5),
    )
    .await;

    let rows = harness.classifications.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].decision, Decision::PauseWebhook);

    // Pause window is about an hour out
    let paused = harness
        .webhooks
        .find_by_id(webhook.id)
        .await
        .unwrap()
        .unwrap();
    let until = paused.paused_until.expect("webhook should be paused");
    let window = until - chrono::Utc::now();
    assert!(window > chrono::Duration::minutes(55));
    assert!(window <= chrono::Duration::hours(1));

    // New events for the paused webhook park without an HTTP attempt
    let second = Event::new(webhook.id, "{}");
    let second_id = second.id;
    harness.service.submit(second).await.unwrap();
    wait_for_status(
        &harness.events,
        second_id,
        EventStatus::Paused,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // Operator resume re-enqueues both paused events
    let resumed = harness.service.resume_webhook(webhook.id).await.unwrap();
    assert_eq!(resumed, 2);

    wait_for_status(
        &harness.events,
        first_id,
        EventStatus::Success,
        Duration::from_secs(5),
    )
    .await;
    wait_for_status(
        &harness.events,
        second_id,
        EventStatus::Success,
        Duration::from_secs(5),
    )
    .await;

    harness.service.stop().await;
}

#[tokio::test]
async fn test_retries_exhausted_becomes_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = DeliveryConfig {
        max_retries: 2,
        ..fast_config()
    };
    let harness = start_harness(config).await;

    let webhook = Webhook::new(format!("{}/busted", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    let event = Event::new(webhook.id, "{}");
    let event_id = event.id;
    harness.service.submit(event).await.unwrap();

    let done = wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Failure,
        Duration::from_secs(10),
    )
    .await;

    // Initial attempt plus two retries, never more
    assert_eq!(done.retry_count, 2);
    assert!(done.failure_reason.unwrap().contains("retries exhausted"));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(harness.classifications.all().await.len(), 3);

    harness.service.stop().await;
}

#[tokio::test]
async fn test_missing_webhook_fails_event() {
    let harness = start_harness(fast_config()).await;

    let event = Event::new(Uuid::new_v4(), "{}");
    let event_id = event.id;
    harness.service.submit(event).await.unwrap();

    let done = wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Failure,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(done.failure_reason.as_deref(), Some("webhook not found"));

    harness.service.stop().await;
}

#[tokio::test]
async fn test_disabled_webhook_parks_events() {
    let harness = start_harness(fast_config()).await;

    let mut webhook = Webhook::new("https://example.com/hook", serde_json::json!({}));
    webhook.is_disabled = true;
    harness.webhooks.save(&webhook).await.unwrap();

    let event = Event::new(webhook.id, "{}");
    let event_id = event.id;
    harness.service.submit(event).await.unwrap();

    wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Paused,
        Duration::from_secs(5),
    )
    .await;

    harness.service.stop().await;
}

#[tokio::test]
async fn test_terminal_event_reprocessing_is_noop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = start_harness(fast_config()).await;

    let webhook = Webhook::new(format!("{}/ok", server.uri()), serde_json::json!({}));
    harness.webhooks.save(&webhook).await.unwrap();

    let event = Event::new(webhook.id, "{}");
    let event_id = event.id;
    let snapshot = event.clone();
    harness.service.submit(event).await.unwrap();

    wait_for_status(
        &harness.events,
        event_id,
        EventStatus::Success,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // Simulate a crash-recovery duplicate: the stale snapshot re-enters the
    // queue, but the persisted event is already terminal
    harness.queue.enqueue(snapshot).await.unwrap();
    sleep(Duration::from_millis(300)).await;

    let event = harness.events.find_by_id(event_id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Success);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let webhook = harness
        .webhooks
        .find_by_id(webhook.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(webhook.total_successes, 1);

    harness.service.stop().await;
}
