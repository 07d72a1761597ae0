/*!
 * In-memory repositories
 *
 * Used by the test suites and by single-process deployments that do not
 * need durability.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use hookrelay_common::Result;
use hookrelay_domain::{ErrorClassification, Event, EventStatus, Webhook};

use super::{ClassificationRepository, EventRepository, WebhookRepository};

#[derive(Default, Clone)]
pub struct InMemoryWebhookRepository {
    rows: Arc<RwLock<HashMap<Uuid, Webhook>>>,
}

impl InMemoryWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn save(&self, webhook: &Webhook) -> Result<()> {
        self.rows.write().await.insert(webhook.id, webhook.clone());
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<Webhook>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<Webhook>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|webhook| webhook.url == url)
            .cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryEventRepository {
    rows: Arc<RwLock<HashMap<Uuid, Event>>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn save(&self, event: &Event) -> Result<()> {
        self.rows.write().await.insert(event.id, event.clone());
        Ok(())
    }

    async fn find_by_webhook_id(&self, webhook_id: Uuid) -> Result<Vec<Event>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|event| event.webhook_id == webhook_id)
            .cloned()
            .collect())
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|event| event.status == status)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryClassificationRepository {
    // Append-only; kept in insertion order
    rows: Arc<RwLock<Vec<ErrorClassification>>>,
}

impl InMemoryClassificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ErrorClassification> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl ClassificationRepository for InMemoryClassificationRepository {
    async fn save(&self, classification: &ErrorClassification) -> Result<()> {
        self.rows.write().await.push(classification.clone());
        Ok(())
    }

    async fn find_by_webhook_id(
        &self,
        webhook_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ErrorClassification>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .rev()
            .filter(|row| row.webhook_id == webhook_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
