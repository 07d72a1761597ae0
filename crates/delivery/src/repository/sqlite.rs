/*!
 * SQLite repositories
 *
 * Durable storage for webhooks, events, and classification audit rows.
 * Runtime sqlx queries with explicit row mapping; ids and enums are stored
 * as TEXT.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use hookrelay_common::{Error, Result};
use hookrelay_domain::{ErrorClassification, Event, EventStatus, Webhook};

use super::{ClassificationRepository, EventRepository, WebhookRepository};

/// Create the delivery tables if they do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhooks (
            id                   TEXT PRIMARY KEY,
            url                  TEXT NOT NULL,
            metadata             TEXT NOT NULL,
            circuit_state        TEXT NOT NULL,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            half_open_probes     INTEGER NOT NULL DEFAULT 0,
            circuit_opened_at    TIMESTAMP,
            last_failure_at      TIMESTAMP,
            total_successes      INTEGER NOT NULL DEFAULT 0,
            total_failures       INTEGER NOT NULL DEFAULT 0,
            paused_until         TIMESTAMP,
            is_disabled          BOOLEAN NOT NULL DEFAULT FALSE,
            created_at           TIMESTAMP NOT NULL,
            updated_at           TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id             TEXT PRIMARY KEY,
            webhook_id     TEXT NOT NULL,
            payload        TEXT NOT NULL,
            status         TEXT NOT NULL,
            retry_count    INTEGER NOT NULL DEFAULT 0,
            failure_reason TEXT,
            created_at     TIMESTAMP NOT NULL,
            updated_at     TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS error_classifications (
            id                  TEXT PRIMARY KEY,
            event_id            TEXT NOT NULL,
            webhook_id          TEXT NOT NULL,
            status_code         INTEGER NOT NULL,
            error_message       TEXT,
            decision            TEXT NOT NULL,
            explanation         TEXT NOT NULL,
            error_type          TEXT NOT NULL,
            retry_after_seconds INTEGER,
            created_at          TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_webhook_id ON events (webhook_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_status ON events (status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_webhook \
         ON error_classifications (webhook_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(anyhow::anyhow!("corrupt {column} column: {e}")))
}

fn parse_text<T>(value: &str, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| Error::Internal(anyhow::anyhow!("corrupt {column} column: {e}")))
}

fn webhook_from_row(row: &SqliteRow) -> Result<Webhook> {
    let id: String = row.try_get("id")?;
    let metadata: String = row.try_get("metadata")?;
    let circuit_state: String = row.try_get("circuit_state")?;

    Ok(Webhook {
        id: parse_uuid(&id, "id")?,
        url: row.try_get("url")?,
        metadata: serde_json::from_str(&metadata)?,
        circuit_state: parse_text(&circuit_state, "circuit_state")?,
        consecutive_failures: row.try_get("consecutive_failures")?,
        half_open_probes: row.try_get("half_open_probes")?,
        circuit_opened_at: row.try_get::<Option<DateTime<Utc>>, _>("circuit_opened_at")?,
        last_failure_at: row.try_get::<Option<DateTime<Utc>>, _>("last_failure_at")?,
        total_successes: row.try_get("total_successes")?,
        total_failures: row.try_get("total_failures")?,
        paused_until: row.try_get::<Option<DateTime<Utc>>, _>("paused_until")?,
        is_disabled: row.try_get("is_disabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event> {
    let id: String = row.try_get("id")?;
    let webhook_id: String = row.try_get("webhook_id")?;
    let status: String = row.try_get("status")?;

    Ok(Event {
        id: parse_uuid(&id, "id")?,
        webhook_id: parse_uuid(&webhook_id, "webhook_id")?,
        payload: row.try_get("payload")?,
        status: parse_text(&status, "status")?,
        retry_count: row.try_get("retry_count")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn classification_from_row(row: &SqliteRow) -> Result<ErrorClassification> {
    let id: String = row.try_get("id")?;
    let event_id: String = row.try_get("event_id")?;
    let webhook_id: String = row.try_get("webhook_id")?;
    let decision: String = row.try_get("decision")?;
    let error_type: String = row.try_get("error_type")?;

    Ok(ErrorClassification {
        id: parse_uuid(&id, "id")?,
        event_id: parse_uuid(&event_id, "event_id")?,
        webhook_id: parse_uuid(&webhook_id, "webhook_id")?,
        status_code: row.try_get("status_code")?,
        error_message: row.try_get("error_message")?,
        decision: parse_text(&decision, "decision")?,
        explanation: row.try_get("explanation")?,
        error_type: parse_text(&error_type, "error_type")?,
        retry_after_seconds: row.try_get("retry_after_seconds")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Clone)]
pub struct SqliteWebhookRepository {
    pool: SqlitePool,
}

impl SqliteWebhookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRepository for SqliteWebhookRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>> {
        let row = sqlx::query("SELECT * FROM webhooks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn save(&self, webhook: &Webhook) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (
                id, url, metadata, circuit_state, consecutive_failures,
                half_open_probes, circuit_opened_at, last_failure_at,
                total_successes, total_failures, paused_until, is_disabled,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                metadata = excluded.metadata,
                circuit_state = excluded.circuit_state,
                consecutive_failures = excluded.consecutive_failures,
                half_open_probes = excluded.half_open_probes,
                circuit_opened_at = excluded.circuit_opened_at,
                last_failure_at = excluded.last_failure_at,
                total_successes = excluded.total_successes,
                total_failures = excluded.total_failures,
                paused_until = excluded.paused_until,
                is_disabled = excluded.is_disabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(webhook.id.to_string())
        .bind(&webhook.url)
        .bind(webhook.metadata.to_string())
        .bind(webhook.circuit_state.to_string())
        .bind(webhook.consecutive_failures)
        .bind(webhook.half_open_probes)
        .bind(webhook.circuit_opened_at)
        .bind(webhook.last_failure_at)
        .bind(webhook.total_successes)
        .bind(webhook.total_failures)
        .bind(webhook.paused_until)
        .bind(webhook.is_disabled)
        .bind(webhook.created_at)
        .bind(webhook.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<Webhook>> {
        let rows = sqlx::query("SELECT * FROM webhooks ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(webhook_from_row).collect()
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<Webhook>> {
        let row = sqlx::query("SELECT * FROM webhooks WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(webhook_from_row).transpose()
    }
}

#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn save(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, webhook_id, payload, status, retry_count,
                failure_reason, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                retry_count = excluded.retry_count,
                failure_reason = excluded.failure_reason,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.webhook_id.to_string())
        .bind(&event.payload)
        .bind(event.status.to_string())
        .bind(event.retry_count)
        .bind(&event.failure_reason)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_webhook_id(&self, webhook_id: Uuid) -> Result<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE webhook_id = ? ORDER BY created_at")
            .bind(webhook_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE status = ? ORDER BY created_at")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(event_from_row).collect()
    }
}

#[derive(Clone)]
pub struct SqliteClassificationRepository {
    pool: SqlitePool,
}

impl SqliteClassificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClassificationRepository for SqliteClassificationRepository {
    async fn save(&self, classification: &ErrorClassification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO error_classifications (
                id, event_id, webhook_id, status_code, error_message,
                decision, explanation, error_type, retry_after_seconds,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(classification.id.to_string())
        .bind(classification.event_id.to_string())
        .bind(classification.webhook_id.to_string())
        .bind(classification.status_code)
        .bind(&classification.error_message)
        .bind(classification.decision.to_string())
        .bind(&classification.explanation)
        .bind(classification.error_type.to_string())
        .bind(classification.retry_after_seconds)
        .bind(classification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_webhook_id(
        &self,
        webhook_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ErrorClassification>> {
        let rows = sqlx::query(
            "SELECT * FROM error_classifications \
             WHERE webhook_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(webhook_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(classification_from_row).collect()
    }
}
