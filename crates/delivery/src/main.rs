/*!
 * HookRelay Delivery Service
 *
 * Pulls events from the delivery queue and sends webhooks to subscriber
 * endpoints.
 *
 * ## Architecture
 *
 * ```text
 * Main Process
 *     │
 *     ├──> Health server (/health, /ready, /metrics)
 *     └──> Worker Pool (N tokio tasks)
 *          ├──> Worker 0: dequeue → gate → HTTP POST → classify → record
 *          ├──> Worker 1: dequeue → gate → HTTP POST → classify → record
 *          ...
 * ```
 *
 * Each worker lane:
 * 1. Dequeues the next event (polling, 100ms interval)
 * 2. Gates on the webhook's pause window and circuit breaker
 * 3. Persists PROCESSING, then sends the HTTP POST
 * 4. On failure, classifies (advisor then rules) and records an audit row
 * 5. Applies the decision: retry with backoff, fail, pause, or escalate
 *
 * ## Configuration
 *
 * Environment variables (see `DeliveryConfig`):
 * - DATABASE_URL: SQLite connection URL
 * - WORKER_THREADS: concurrent delivery lanes (default: 5)
 * - MAX_RETRIES: maximum retry attempts (default: 5)
 * - CIRCUIT_FAILURE_THRESHOLD: failures before a circuit opens (default: 5)
 * - ADVISOR_URL: optional remote classifier endpoint
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use hookrelay_delivery::config::DeliveryConfig;
use hookrelay_delivery::health::start_health_server;
use hookrelay_delivery::queue::InMemoryQueue;
use hookrelay_delivery::repository::{
    SqliteClassificationRepository, SqliteEventRepository, SqliteWebhookRepository, init_schema,
};
use hookrelay_delivery::worker::DeliveryService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    hookrelay_common::init_tracing();

    info!("Starting HookRelay Delivery Service");

    // Load configuration
    let config = DeliveryConfig::from_env().context("Failed to load configuration")?;

    info!("Configuration loaded:");
    info!("   - Workers: {}", config.worker_threads);
    info!(
        "   - HTTP timeouts: connect={:?} read={:?}",
        config.connect_timeout(),
        config.read_timeout()
    );
    info!(
        "   - Retry: base={}ms max={}ms retries={}",
        config.retry_base_delay_ms, config.retry_max_delay_ms, config.max_retries
    );
    info!(
        "   - Circuit breaker: threshold={} cooldown={}s half-open limit={}",
        config.circuit_failure_threshold,
        config.circuit_cooldown_secs,
        config.circuit_half_open_test_limit
    );
    match (&config.advisor_url, config.advisor_enabled) {
        (Some(url), true) => info!("   - Advisor: {url}"),
        _ => info!("   - Advisor: disabled"),
    }

    // Create the database pool and schema
    info!("Connecting to database...");
    let pool = hookrelay_common::create_pool(&config.database_url, 20)
        .await
        .context("Failed to create database pool")?;
    init_schema(&pool)
        .await
        .context("Failed to initialize schema")?;
    info!("Database ready");

    // Repositories, queue, and the delivery core
    let webhooks = Arc::new(SqliteWebhookRepository::new(pool.clone()));
    let events = Arc::new(SqliteEventRepository::new(pool.clone()));
    let classifications = Arc::new(SqliteClassificationRepository::new(pool));
    let queue = Arc::new(InMemoryQueue::new());

    let service = DeliveryService::new(config.clone(), queue, webhooks, events, classifications)
        .context("Failed to create delivery service")?;

    // Health server starts first so probes see initialization progress
    let health_state = service.service_state();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_port, health_state).await {
            error!("Health server failed: {e}");
        }
    });

    // Worker pool
    service.start().await;

    info!("HookRelay Delivery is READY ({} workers)", config.worker_threads);
    info!("   - Health: http://0.0.0.0:{}/health", config.health_port);
    info!("   - Ready:  http://0.0.0.0:{}/ready", config.health_port);
    info!("   - Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal");

    service.stop().await;

    info!("HookRelay Delivery stopped");
    Ok(())
}
