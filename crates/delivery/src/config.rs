/*!
 * Configuration Module for the Delivery Service
 */

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::classifier::{ClassificationRule, default_rules};

/// Main configuration for the delivery service.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// SQLite connection URL
    pub database_url: String,

    /// Number of concurrent delivery worker lanes
    pub worker_threads: usize,

    /// Sleep between queue polls when the queue is empty
    pub poll_interval_ms: u64,

    /// HTTP connect timeout per delivery attempt
    pub connect_timeout_ms: u64,

    /// HTTP read timeout per delivery attempt
    pub read_timeout_ms: u64,

    /// Base delay for exponential backoff
    pub retry_base_delay_ms: u64,

    /// Backoff cap
    pub retry_max_delay_ms: u64,

    /// Maximum retries per event
    pub max_retries: u32,

    /// Consecutive failures before a webhook's circuit opens
    pub circuit_failure_threshold: u32,

    /// How long an open circuit blocks requests
    pub circuit_cooldown_secs: u64,

    /// Probes admitted while HALF_OPEN
    pub circuit_half_open_test_limit: u32,

    /// How long a PAUSE_WEBHOOK decision suspends an endpoint
    pub pause_window_secs: u64,

    /// Advisor endpoint; absent disables the advisor
    pub advisor_url: Option<String>,
    pub advisor_enabled: bool,
    pub advisor_timeout_ms: u64,
    pub advisor_fallback_enabled: bool,
    pub advisor_confidence_threshold: f64,

    /// JSON file overriding the default classification rule list
    pub classification_rules_path: Option<String>,

    /// Health/metrics server port
    pub health_port: u16,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://hookrelay.db".to_string(),
            worker_threads: 5,
            poll_interval_ms: 100,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            max_retries: 5,
            circuit_failure_threshold: 5,
            circuit_cooldown_secs: 60,
            circuit_half_open_test_limit: 3,
            pause_window_secs: 3_600,
            advisor_url: None,
            advisor_enabled: true,
            advisor_timeout_ms: 5_000,
            advisor_fallback_enabled: true,
            advisor_confidence_threshold: 0.6,
            classification_rules_path: None,
            health_port: 8080,
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{name} must be a valid value")),
        Err(_) => Ok(default),
    }
}

impl DeliveryConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;

        Ok(Self {
            database_url,
            worker_threads: env_parse("WORKER_THREADS", defaults.worker_threads)?,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            connect_timeout_ms: env_parse("HTTP_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms)?,
            read_timeout_ms: env_parse("HTTP_READ_TIMEOUT_MS", defaults.read_timeout_ms)?,
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
            retry_max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms)?,
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries)?,
            circuit_failure_threshold: env_parse(
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_failure_threshold,
            )?,
            circuit_cooldown_secs: env_parse(
                "CIRCUIT_COOLDOWN_SECS",
                defaults.circuit_cooldown_secs,
            )?,
            circuit_half_open_test_limit: env_parse(
                "CIRCUIT_HALF_OPEN_TEST_LIMIT",
                defaults.circuit_half_open_test_limit,
            )?,
            pause_window_secs: env_parse("PAUSE_WINDOW_SECS", defaults.pause_window_secs)?,
            advisor_url: env::var("ADVISOR_URL").ok(),
            advisor_enabled: env_parse("ADVISOR_ENABLED", defaults.advisor_enabled)?,
            advisor_timeout_ms: env_parse("ADVISOR_TIMEOUT_MS", defaults.advisor_timeout_ms)?,
            advisor_fallback_enabled: env_parse(
                "ADVISOR_FALLBACK_ENABLED",
                defaults.advisor_fallback_enabled,
            )?,
            advisor_confidence_threshold: env_parse(
                "ADVISOR_CONFIDENCE_THRESHOLD",
                defaults.advisor_confidence_threshold,
            )?,
            classification_rules_path: env::var("CLASSIFICATION_RULES_PATH").ok(),
            health_port: env_parse("HEALTH_PORT", defaults.health_port)?,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    pub fn pause_window(&self) -> Duration {
        Duration::from_secs(self.pause_window_secs)
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_millis(self.advisor_timeout_ms)
    }

    /// Classification rules: the configured override file, or the built-in
    /// defaults.
    pub fn load_rules(&self) -> Result<Vec<ClassificationRule>> {
        match &self.classification_rules_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read classification rules from {path}"))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse classification rules from {path}"))
            }
            None => Ok(default_rules()),
        }
    }
}
