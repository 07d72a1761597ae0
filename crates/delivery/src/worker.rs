/*!
 * Delivery Worker
 *
 * Long-running supervisor driving events through the delivery state
 * machine:
 *
 * ```text
 * PENDING -> PROCESSING -> (SUCCESS | FAILURE | RETRY_PENDING | PAUSED)
 * RETRY_PENDING -> PENDING (re-enqueue after backoff)
 * PAUSED -> PENDING (external resume)
 * ```
 *
 * A pool of worker lanes polls the queue; each event is driven by exactly
 * one lane at a time. Webhook health fields are updated under a per-webhook
 * lock so breaker transitions and counters stay serialisable. Every status
 * transition is persisted before the action that depends on it, in
 * particular PROCESSING is durable before the outbound POST.
 */

use anyhow::Result as AnyResult;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hookrelay_common::Result;
use hookrelay_domain::{CircuitState, Decision, ErrorClassification, Event, EventStatus, Webhook};

use crate::circuit_breaker::CircuitBreaker;
use crate::classifier::{
    AdvisorClient, ClassificationContext, ClassificationSource, ErrorClassifier, RuleEngine,
};
use crate::client::{DeliveryClient, DeliveryResult};
use crate::config::DeliveryConfig;
use crate::health::ServiceState;
use crate::metrics;
use crate::queue::EventQueue;
use crate::repository::{ClassificationRepository, EventRepository, WebhookRepository};
use crate::retry::RetryPolicy;

/// Per-webhook locks serialising health-field updates across worker lanes.
#[derive(Default)]
struct WebhookLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl WebhookLocks {
    async fn lock_for(&self, webhook_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().await;
        Arc::clone(locks.entry(webhook_id).or_default())
    }
}

/// The delivery supervisor: owns the worker pool and is the only component
/// that transitions Event status.
pub struct DeliveryService {
    config: DeliveryConfig,
    queue: Arc<dyn EventQueue>,
    webhooks: Arc<dyn WebhookRepository>,
    events: Arc<dyn EventRepository>,
    classifications: Arc<dyn ClassificationRepository>,
    client: DeliveryClient,
    classifier: ErrorClassifier,
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    webhook_locks: WebhookLocks,
    state: ServiceState,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliveryService {
    /// Compose the delivery core from configuration and its persistence
    /// collaborators.
    pub fn new(
        config: DeliveryConfig,
        queue: Arc<dyn EventQueue>,
        webhooks: Arc<dyn WebhookRepository>,
        events: Arc<dyn EventRepository>,
        classifications: Arc<dyn ClassificationRepository>,
    ) -> AnyResult<Arc<Self>> {
        let client = DeliveryClient::new(config.connect_timeout(), config.read_timeout())?;

        let engine = RuleEngine::new(config.load_rules()?)?;
        let advisor = match (&config.advisor_url, config.advisor_enabled) {
            (Some(url), true) => Some(AdvisorClient::new(
                url.clone(),
                config.advisor_timeout(),
                config.advisor_confidence_threshold,
            )?),
            _ => None,
        };
        let classifier = ErrorClassifier::new(engine, advisor, config.advisor_fallback_enabled);

        let breaker = CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_cooldown(),
            config.circuit_half_open_test_limit,
        );
        let retry_policy = RetryPolicy::new(
            config.retry_base_delay_ms,
            config.retry_max_delay_ms,
            config.max_retries,
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = ServiceState::new(config.worker_threads);

        Ok(Arc::new(Self {
            config,
            queue,
            webhooks,
            events,
            classifications,
            client,
            classifier,
            breaker,
            retry_policy,
            webhook_locks: WebhookLocks::default(),
            state,
            running: AtomicBool::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }))
    }

    pub fn service_state(&self) -> ServiceState {
        self.state.clone()
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.len().await
    }

    /// Spawn the worker pool. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            "Starting delivery worker pool ({} lanes, poll interval {:?})",
            self.config.worker_threads,
            self.config.poll_interval()
        );

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.worker_threads {
            let service = Arc::clone(self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                service
                    .state
                    .workers_initialized
                    .fetch_add(1, Ordering::SeqCst);
                info!("[Worker {}] Starting", worker_id);
                service.worker_loop(worker_id, &mut shutdown_rx).await;
                info!("[Worker {}] Stopped", worker_id);
            }));
        }

        self.state.ready.store(true, Ordering::SeqCst);
    }

    /// Graceful shutdown: drain for up to 10s, then abort within 5s more.
    pub async fn stop(&self) {
        info!("Stopping delivery worker pool");
        self.running.store(false, Ordering::SeqCst);
        self.state.ready.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let mut handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();

        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            for handle in &mut handles {
                let _ = handle.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("Graceful drain timed out; aborting remaining workers");
            for handle in &handles {
                handle.abort();
            }
            let _ = tokio::time::timeout(Duration::from_secs(5), async {
                for handle in &mut handles {
                    let _ = handle.await;
                }
            })
            .await;
        }

        info!("Delivery worker pool stopped");
    }

    /// Producer handoff: persist the event, then queue it.
    pub async fn submit(&self, event: Event) -> Result<()> {
        self.events.save(&event).await?;
        debug!(event_id = %event.id, webhook_id = %event.webhook_id, "Event accepted");
        self.queue.enqueue(event).await?;
        self.update_queue_gauge().await;
        Ok(())
    }

    /// External resume: flip a PAUSED event back to PENDING and re-enqueue.
    ///
    /// Returns false if the event does not exist or is not paused.
    pub async fn resume_event(&self, event_id: Uuid) -> Result<bool> {
        let Some(mut event) = self.events.find_by_id(event_id).await? else {
            return Ok(false);
        };
        if event.status != EventStatus::Paused {
            return Ok(false);
        }

        event.status = EventStatus::Pending;
        self.save_event(&mut event).await?;
        info!(event_id = %event_id, "Resuming paused event");
        self.queue.enqueue(event).await?;
        Ok(true)
    }

    /// Operator resume: clear the pause window and re-enqueue every PAUSED
    /// event of this webhook. Returns the number of events resumed.
    pub async fn resume_webhook(&self, webhook_id: Uuid) -> Result<usize> {
        let lock = self.webhook_locks.lock_for(webhook_id).await;
        {
            let _guard = lock.lock().await;
            if let Some(mut webhook) = self.webhooks.find_by_id(webhook_id).await? {
                webhook.paused_until = None;
                webhook.updated_at = Utc::now();
                self.webhooks.save(&webhook).await?;
            }
        }

        let mut resumed = 0;
        for event in self.events.find_by_webhook_id(webhook_id).await? {
            if event.status == EventStatus::Paused && self.resume_event(event.id).await? {
                resumed += 1;
            }
        }
        info!(webhook_id = %webhook_id, resumed, "Webhook resumed");
        Ok(resumed)
    }

    /// Operator intervention: force a webhook's breaker back to CLOSED.
    pub async fn reset_breaker(&self, webhook_id: Uuid) -> Result<()> {
        let lock = self.webhook_locks.lock_for(webhook_id).await;
        let _guard = lock.lock().await;

        if let Some(mut webhook) = self.webhooks.find_by_id(webhook_id).await? {
            self.breaker.reset(&mut webhook);
            webhook.updated_at = Utc::now();
            self.webhooks.save(&webhook).await?;
            update_breaker_gauge(&webhook);
        }
        Ok(())
    }

    async fn worker_loop(&self, worker_id: usize, shutdown_rx: &mut broadcast::Receiver<()>) {
        loop {
            if shutdown_rx.try_recv().is_ok() || !self.running.load(Ordering::SeqCst) {
                break;
            }

            match self.queue.dequeue().await {
                Ok(Some(event)) => {
                    metrics::EVENTS_CONSUMED_TOTAL
                        .with_label_values(&[&worker_id.to_string()])
                        .inc();
                    self.update_queue_gauge().await;
                    self.process_event(worker_id, event).await;
                }
                Ok(None) => {
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Err(e) => {
                    error!("[Worker {}] Failed to dequeue: {e}. Retrying in 1s", worker_id);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Drive one event; any unexpected error becomes a terminal FAILURE
    /// carrying the cause.
    async fn process_event(&self, worker_id: usize, queued: Event) {
        let event_id = queued.id;

        if let Err(e) = self.drive_event(worker_id, queued).await {
            error!(
                "[Worker {}] Internal error processing event {}: {e}",
                worker_id, event_id
            );
            match self.events.find_by_id(event_id).await {
                Ok(Some(mut event)) if !event.status.is_terminal() => {
                    event.status = EventStatus::Failure;
                    event.failure_reason = Some(format!("internal error: {e}"));
                    if let Err(save_err) = self.save_event(&mut event).await {
                        error!(
                            "[Worker {}] Could not persist FAILURE for event {}: {save_err}",
                            worker_id, event_id
                        );
                    }
                }
                _ => {}
            }
        }
    }

    async fn drive_event(&self, worker_id: usize, queued: Event) -> Result<()> {
        // The queue hands over a snapshot; reload so a re-enqueued or
        // crash-recovered event that already reached a terminal state is a
        // no-op.
        let mut event = match self.events.find_by_id(queued.id).await? {
            Some(event) => event,
            None => {
                warn!(event_id = %queued.id, "Dequeued event has no persisted row; dropping");
                return Ok(());
            }
        };
        if event.status.is_terminal() {
            debug!(event_id = %event.id, status = %event.status, "Event already terminal; skipping");
            return Ok(());
        }

        let now = Utc::now();

        // 1. Load the webhook
        let Some(webhook) = self.webhooks.find_by_id(event.webhook_id).await? else {
            self.fail_event(&mut event, "webhook not found").await?;
            return Ok(());
        };

        // 2. Disabled/paused endpoints park the event until resumed
        if webhook.is_paused_at(now) {
            debug!(
                event_id = %event.id,
                webhook_id = %webhook.id,
                "Webhook paused or disabled; parking event"
            );
            event.status = EventStatus::Paused;
            event.failure_reason = Some("webhook is paused".to_string());
            self.save_event(&mut event).await?;
            return Ok(());
        }

        // 3. Circuit breaker gate, serialised per webhook. The potential
        //    OPEN -> HALF_OPEN transition must be durable before the probe.
        let lock = self.webhook_locks.lock_for(webhook.id).await;
        let (admitted, webhook) = {
            let _guard = lock.lock().await;
            let mut webhook = self
                .webhooks
                .find_by_id(event.webhook_id)
                .await?
                .unwrap_or(webhook);
            let admitted = self.breaker.allow_request(&mut webhook, now);
            webhook.updated_at = now;
            self.webhooks.save(&webhook).await?;
            update_breaker_gauge(&webhook);
            (admitted, webhook)
        };

        if !admitted {
            event.status = EventStatus::RetryPending;
            self.save_event(&mut event).await?;

            let reopens_at = self.breaker.reopens_at(&webhook).unwrap_or(now);
            let wait = (reopens_at - Utc::now()).to_std().unwrap_or_default();
            info!(
                "[Worker {}] Circuit open for webhook {}; deferring event {} for {:?}",
                worker_id, webhook.id, event.id, wait
            );
            tokio::time::sleep(wait).await;

            event.status = EventStatus::Pending;
            self.save_event(&mut event).await?;
            self.queue.enqueue(event).await?;
            return Ok(());
        }

        // 4. PROCESSING is persisted before the outbound POST
        event.status = EventStatus::Processing;
        self.save_event(&mut event).await?;

        // 5. One delivery attempt
        let result = self.client.deliver(&webhook, &event.payload).await;

        metrics::DELIVERY_ATTEMPTS_TOTAL
            .with_label_values(&[&webhook.id.to_string(), &result.success.to_string()])
            .inc();
        metrics::DELIVERY_DURATION
            .with_label_values(&[&webhook.id.to_string()])
            .observe(result.duration_ms as f64 / 1000.0);
        if result.status_code > 0 {
            metrics::HTTP_RESPONSES_TOTAL
                .with_label_values(&[&result.status_code.to_string()])
                .inc();
        }

        if result.success {
            // 6. Success: breaker + counters first, then the terminal state
            {
                let _guard = lock.lock().await;
                if let Some(mut webhook) = self.webhooks.find_by_id(webhook.id).await? {
                    self.breaker.record_success(&mut webhook);
                    webhook.total_successes += 1;
                    webhook.updated_at = Utc::now();
                    self.webhooks.save(&webhook).await?;
                    update_breaker_gauge(&webhook);
                }
            }

            event.status = EventStatus::Success;
            event.failure_reason = None;
            self.save_event(&mut event).await?;
            info!(
                "[Worker {}] Delivered event {} (webhook {}, attempt {})",
                worker_id,
                event.id,
                webhook.id,
                event.retry_count + 1
            );
            return Ok(());
        }

        // 7. Failure path
        self.handle_failure(worker_id, event, webhook, lock, result)
            .await
    }

    async fn handle_failure(
        &self,
        worker_id: usize,
        mut event: Event,
        webhook: Webhook,
        lock: Arc<Mutex<()>>,
        result: DeliveryResult,
    ) -> Result<()> {
        // 7a. Classify with the webhook health known before this failure
        let context = ClassificationContext {
            webhook_id: webhook.id,
            retry_count: event.retry_count,
            recent_failure_rate: recent_failure_rate(&webhook),
            total_failures: webhook.total_failures,
            total_successes: webhook.total_successes,
            consecutive_failures: webhook.consecutive_failures,
            circuit_breaker_state: webhook.circuit_state,
        };
        let classification = self.classifier.classify(&result, &context).await;

        let source_label = match &classification.source {
            ClassificationSource::Advisor => "advisor",
            ClassificationSource::Rule(_) => "rules",
        };
        metrics::CLASSIFIER_DECISIONS_TOTAL
            .with_label_values(&[&classification.decision.to_string(), source_label])
            .inc();

        // 7b. Append the audit row
        self.classifications
            .save(&ErrorClassification::record(
                event.id,
                webhook.id,
                result.status_code,
                result.error_message.clone(),
                classification.decision,
                classification.explanation.clone(),
                classification.error_type,
                result.retry_after_seconds,
            ))
            .await?;

        // 7c. Record the failure on the webhook
        let now = Utc::now();
        {
            let _guard = lock.lock().await;
            if let Some(mut webhook) = self.webhooks.find_by_id(webhook.id).await? {
                self.breaker.record_failure(&mut webhook, now);
                webhook.total_failures += 1;
                webhook.last_failure_at = Some(now);
                webhook.updated_at = now;
                self.webhooks.save(&webhook).await?;
                update_breaker_gauge(&webhook);
            }
        }

        // 7d. Apply the decision
        match classification.decision {
            Decision::Retry => {
                if self.retry_policy.should_retry(event.retry_count as u32) {
                    let delay = self
                        .retry_policy
                        .delay_with_hint(event.retry_count as u32, result.retry_after_seconds);

                    event.retry_count += 1;
                    event.status = EventStatus::RetryPending;
                    event.failure_reason = Some(classification.explanation.clone());
                    self.save_event(&mut event).await?;

                    metrics::RETRY_ATTEMPTS_TOTAL
                        .with_label_values(&[&webhook.id.to_string()])
                        .inc();
                    warn!(
                        "[Worker {}] Event {} failed (status {}); retry {}/{} in {:?}",
                        worker_id,
                        event.id,
                        result.status_code,
                        event.retry_count,
                        self.retry_policy.max_retries(),
                        delay
                    );

                    // The backoff occupies this lane, matching one retry
                    // timer per lane
                    tokio::time::sleep(delay).await;

                    event.status = EventStatus::Pending;
                    self.save_event(&mut event).await?;
                    self.queue.enqueue(event).await?;
                } else {
                    let reason = format!(
                        "retries exhausted after {} retries: {}",
                        event.retry_count, classification.explanation
                    );
                    self.fail_event(&mut event, &reason).await?;
                }
            }
            Decision::FailPermanent => {
                self.fail_event(&mut event, &classification.explanation)
                    .await?;
            }
            Decision::PauseWebhook => {
                let paused_until = now + chrono_pause_window(self.config.pause_window());
                {
                    let _guard = lock.lock().await;
                    if let Some(mut webhook) = self.webhooks.find_by_id(webhook.id).await? {
                        webhook.paused_until = Some(paused_until);
                        webhook.updated_at = now;
                        self.webhooks.save(&webhook).await?;
                    }
                }

                event.status = EventStatus::Paused;
                event.failure_reason = Some(classification.explanation.clone());
                self.save_event(&mut event).await?;
                warn!(
                    "[Worker {}] Webhook {} paused until {} ({})",
                    worker_id, webhook.id, paused_until, classification.explanation
                );
            }
            Decision::Escalate => {
                // Alerting hook: operators subscribe to this target
                error!(
                    target: "hookrelay::alerts",
                    event_id = %event.id,
                    webhook_id = %webhook.id,
                    status = result.status_code,
                    "Delivery escalated: {}",
                    classification.explanation
                );
                let reason = format!("escalated: {}", classification.explanation);
                self.fail_event(&mut event, &reason).await?;
            }
        }

        Ok(())
    }

    async fn fail_event(&self, event: &mut Event, reason: &str) -> Result<()> {
        event.status = EventStatus::Failure;
        event.failure_reason = Some(reason.to_string());
        self.save_event(event).await?;
        warn!(event_id = %event.id, reason, "Event failed permanently");
        Ok(())
    }

    async fn save_event(&self, event: &mut Event) -> Result<()> {
        event.updated_at = Utc::now();
        self.events.save(event).await
    }

    async fn update_queue_gauge(&self) {
        metrics::EVENT_QUEUE_DEPTH
            .with_label_values(&["delivery"])
            .set(self.queue.len().await as i64);
    }
}

fn recent_failure_rate(webhook: &Webhook) -> f64 {
    webhook.success_rate().map_or(0.0, |rate| 1.0 - rate)
}

fn chrono_pause_window(window: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(window.as_millis() as i64)
}

fn update_breaker_gauge(webhook: &Webhook) {
    let value = match webhook.circuit_state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    };
    metrics::CIRCUIT_BREAKER_STATE
        .with_label_values(&[&webhook.id.to_string()])
        .set(value);
}
