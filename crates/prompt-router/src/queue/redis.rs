//! Redis stream queue.
//!
//! Every message is appended with `XADD <stream> * ordering_key <subject>
//! body <json>`. A single stream totally orders its entries, so messages for
//! one subject are consumed in submission order. The stream entry id is the
//! message id.
//!
//! The multiplexed connection is cheap to clone and safe to use
//! concurrently; each publish clones it.

use super::{MessageQueue, QueueMessage};
use crate::errors::InfraError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::time::Duration;

#[derive(Clone)]
pub struct RedisStreamQueue {
    connection: MultiplexedConnection,
    stream: String,
    timeout: Duration,
}

impl RedisStreamQueue {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `InfraError::EnqueueFailed` if the URL is invalid or the
    /// connection cannot be established within `timeout`.
    pub async fn connect(redis_url: &str, stream: String, timeout: Duration) -> Result<Self, InfraError> {
        // Do NOT log redis_url: it may contain credentials
        let client = Client::open(redis_url).map_err(|e| {
            tracing::error!(target: "router.queue.redis", error = %e, "Failed to open Redis client");
            InfraError::EnqueueFailed(format!("failed to open Redis client: {e}"))
        })?;

        let connection = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| InfraError::EnqueueFailed("Redis connect timed out".to_string()))?
            .map_err(|e| {
                tracing::error!(target: "router.queue.redis", error = %e, "Failed to connect to Redis");
                InfraError::EnqueueFailed(format!("failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            stream,
            timeout,
        })
    }
}

#[async_trait]
impl MessageQueue for RedisStreamQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<String, InfraError> {
        let body = message.body_json()?;
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream)
            .arg("*")
            .arg("ordering_key")
            .arg(message.ordering_key())
            .arg("body")
            .arg(body);

        let entry_id: String = tokio::time::timeout(self.timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| InfraError::EnqueueFailed("XADD timed out".to_string()))?
            .map_err(|e| InfraError::EnqueueFailed(format!("XADD failed: {e}")))?;

        Ok(entry_id)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
