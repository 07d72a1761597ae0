/*!
 * HookRelay Delivery Core
 *
 * Reliable at-least-once webhook delivery: a persistent event queue feeds a
 * pool of worker lanes that POST payloads to subscriber endpoints, gate on
 * per-webhook circuit breakers, classify failures through a rule engine
 * (optionally advised by a remote classifier), and retry with jittered
 * exponential backoff honouring `Retry-After`.
 */

pub mod circuit_breaker;
pub mod classifier;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod repository;
pub mod retry;
pub mod worker;

pub use circuit_breaker::CircuitBreaker;
pub use classifier::{
    Classification, ClassificationContext, ClassificationRule, ErrorClassifier, RuleEngine,
};
pub use client::{DeliveryClient, DeliveryResult};
pub use config::DeliveryConfig;
pub use queue::{EventQueue, InMemoryQueue};
pub use retry::RetryPolicy;
pub use worker::DeliveryService;
