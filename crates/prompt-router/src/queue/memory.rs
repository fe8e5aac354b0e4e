//! In-process queue for local runs and tests.

use super::{MessageQueue, QueueMessage};
use crate::errors::InfraError;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// A message as recorded by [`InMemoryQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: String,
    pub ordering_key: String,
    pub body: String,
}

/// Totally ordered in-memory queue.
///
/// A single append-only log, so per-key order follows submission order.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    log: Mutex<Vec<StoredMessage>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message in publication order.
    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.log.lock().await.clone()
    }

    /// Messages published under `ordering_key`, in publication order.
    pub async fn messages_for(&self, ordering_key: &str) -> Vec<StoredMessage> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|m| m.ordering_key == ordering_key)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.log.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<String, InfraError> {
        let stored = StoredMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            ordering_key: message.ordering_key().to_string(),
            body: message.body_json()?,
        };
        let message_id = stored.message_id.clone();
        self.log.lock().await.push(stored);
        Ok(message_id)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
