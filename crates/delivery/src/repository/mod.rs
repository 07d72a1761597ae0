/*!
 * Persistence contracts consumed by the delivery core.
 *
 * The worker only talks to these traits; storage lives behind them. Two
 * implementations ship: an in-memory store (tests, single-process default)
 * and SQLite via sqlx.
 */

pub mod memory;
pub mod sqlite;

pub use memory::{
    InMemoryClassificationRepository, InMemoryEventRepository, InMemoryWebhookRepository,
};
pub use sqlite::{
    SqliteClassificationRepository, SqliteEventRepository, SqliteWebhookRepository, init_schema,
};

use async_trait::async_trait;
use uuid::Uuid;

use hookrelay_common::Result;
use hookrelay_domain::{ErrorClassification, Event, EventStatus, Webhook};

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>>;

    /// Insert or update; the webhook id is the identity.
    async fn save(&self, webhook: &Webhook) -> Result<()>;

    async fn find_all(&self) -> Result<Vec<Webhook>>;

    async fn find_by_url(&self, url: &str) -> Result<Option<Webhook>>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>>;

    /// Insert or update; the event id is the identity.
    async fn save(&self, event: &Event) -> Result<()>;

    async fn find_by_webhook_id(&self, webhook_id: Uuid) -> Result<Vec<Event>>;

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>>;
}

/// Append-only audit store for error classifications.
#[async_trait]
pub trait ClassificationRepository: Send + Sync {
    async fn save(&self, classification: &ErrorClassification) -> Result<()>;

    /// Most recent classifications for a webhook, newest first.
    async fn find_by_webhook_id(
        &self,
        webhook_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ErrorClassification>>;
}
