//! OfflineQueue: FIFO per-recipient queue backed by the registry's queue
//! primitive (§4.6, §6.4).

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::message::FramedMessage;
use crate::registry::RegistryClient;

const QUEUE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct OfflineQueue {
    registry: Arc<dyn RegistryClient>,
    queue_base: String,
}

impl OfflineQueue {
    pub fn new(registry: Arc<dyn RegistryClient>, queue_base: impl Into<String>) -> Self {
        OfflineQueue { registry, queue_base: queue_base.into() }
    }

    fn queued_key(&self, id: &str) -> String {
        format!("{}:{}:queued", self.queue_base, id)
    }

    fn processing_key(&self, id: &str) -> String {
        format!("{}:{}:processing", self.queue_base, id)
    }

    pub async fn enqueue(&self, id: &str, msg: &FramedMessage) -> Result<()> {
        self.registry.queue_push(&self.queued_key(id), msg, QUEUE_TTL).await
    }

    /// Atomic move from queued → processing; `None` when the queue is empty.
    pub async fn dequeue(&self, id: &str) -> Result<Option<FramedMessage>> {
        self.registry.queue_move(&self.queued_key(id), &self.processing_key(id), QUEUE_TTL).await
    }

    pub async fn complete(&self, id: &str, msg: &FramedMessage) -> Result<()> {
        self.registry.queue_remove(&self.processing_key(id), &msg.mid).await
    }

    /// Drain protocol on reconnect (§4.6): loop `dequeue` until empty,
    /// handing each message to `deliver`. If `deliver` fails the message
    /// stays in `processing` and is not re-drained, per the documented
    /// current behavior (§9 open question i).
    pub async fn drain<F, Fut>(&self, id: &str, mut deliver: F) -> Result<usize>
    where
        F: FnMut(FramedMessage) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let mut delivered = 0;
        while let Some(msg) = self.dequeue(id).await? {
            if deliver(msg.clone()).await {
                self.complete(id, &msg).await?;
                delivered += 1;
            } else {
                break;
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistryClient;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_delivers_in_fifo_order() {
        let registry = Arc::new(InMemoryRegistryClient::new());
        let queue = OfflineQueue::new(registry, "hydra-router:message:queue");

        for i in 0..3 {
            let msg = FramedMessage::new("client1", "svc@router:/", json!({"i": i}), "tr");
            queue.enqueue("client1", &msg).await.unwrap();
        }

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order2 = order.clone();
        let delivered = queue
            .drain("client1", move |msg| {
                let order2 = order2.clone();
                async move {
                    order2.lock().unwrap().push(msg.body["i"].as_i64().unwrap());
                    true
                }
            })
            .await
            .unwrap();

        assert_eq!(delivered, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_entry_in_processing() {
        let registry = Arc::new(InMemoryRegistryClient::new());
        let queue = OfflineQueue::new(registry.clone(), "hydra-router:message:queue");
        let msg = FramedMessage::new("client1", "svc@router:/", json!({}), "tr");
        queue.enqueue("client1", &msg).await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();
        let delivered = queue
            .drain("client1", move |_msg| {
                attempts2.fetch_add(1, Ordering::SeqCst);
                async move { false }
            })
            .await
            .unwrap();

        assert_eq!(delivered, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let processing = registry.queues.lock().unwrap();
        assert_eq!(processing.get("hydra-router:message:queue:client1:processing").unwrap().len(), 1);
    }
}
