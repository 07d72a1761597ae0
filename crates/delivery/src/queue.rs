/*!
 * Event Queue
 *
 * Handoff buffer between producers and delivery workers.
 *
 * The in-process implementation is lock-free. The trait is the seam a
 * durable backend (with bounded capacity and producer blocking) would plug
 * into without changing the delivery worker.
 */

use async_trait::async_trait;
use crossbeam_queue::SegQueue;
use tracing::debug;

use hookrelay_common::Result;
use hookrelay_domain::Event;

/// Multi-producer/multi-consumer event queue.
///
/// Events enqueued from a single producer are observed in FIFO order with
/// respect to that producer; no global ordering across producers is
/// guaranteed.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Add an event to the back of the queue.
    async fn enqueue(&self, event: Event) -> Result<()>;

    /// Take the oldest available event, or `None` if the queue is empty.
    async fn dequeue(&self) -> Result<Option<Event>>;

    /// Number of events currently queued.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Unbounded in-process queue backed by a lock-free segmented buffer.
///
/// Accepts all enqueues; operators must monitor `len()`.
#[derive(Default)]
pub struct InMemoryQueue {
    inner: SegQueue<Event>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventQueue for InMemoryQueue {
    async fn enqueue(&self, event: Event) -> Result<()> {
        debug!(event_id = %event.id, webhook_id = %event.webhook_id, "Enqueued event");
        self.inner.push(event);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Event>> {
        Ok(self.inner.pop())
    }

    async fn len(&self) -> usize {
        self.inner.len()
    }
}
