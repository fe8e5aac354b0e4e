//! Ordered publication of admitted prompt requests.
//!
//! Every message is keyed by the authenticated subject so a consumer sees one
//! caller's requests in submission order. Backends are selected once at
//! startup from [`QueueTarget`]:
//!
//! - `http` - SQS-compatible JSON endpoint ([`HttpQueue`])
//! - `redis` - Redis stream ([`RedisStreamQueue`])
//! - `memory` - in-process queue ([`InMemoryQueue`])
//!
//! No backend retries internally; a failed publish surfaces as
//! `InfraError::EnqueueFailed` and the caller decides.

mod http;
mod memory;
mod redis;

pub use self::http::HttpQueue;
pub use self::memory::{InMemoryQueue, StoredMessage};
pub use self::redis::RedisStreamQueue;

use crate::config::QueueTarget;
use crate::errors::InfraError;
use crate::observability::metrics;
use crate::validation::PromptRequest;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// One admitted request, ready for publication.
pub struct QueueMessage {
    token: SecretString,
    prompt: String,
    idle_minutes: u8,
    request_id: String,
    ordering_key: String,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    token: &'a str,
    prompt: &'a str,
    idle: u8,
    request_id: &'a str,
}

impl QueueMessage {
    /// `ordering_key` must be the verified subject.
    pub fn new(
        token: SecretString,
        request: PromptRequest,
        request_id: String,
        ordering_key: String,
    ) -> Self {
        let (prompt, idle_minutes) = request.into_parts();
        Self {
            token,
            prompt,
            idle_minutes,
            request_id,
            ordering_key,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn idle_minutes(&self) -> u8 {
        self.idle_minutes
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn ordering_key(&self) -> &str {
        &self.ordering_key
    }

    /// Serialized message body: `{"token","prompt","idle","request_id"}`.
    ///
    /// The ordering key travels as queue metadata, not in the body.
    pub fn body_json(&self) -> Result<String, InfraError> {
        serde_json::to_string(&MessageBody {
            token: self.token.expose_secret(),
            prompt: &self.prompt,
            idle: self.idle_minutes,
            request_id: &self.request_id,
        })
        .map_err(|e| InfraError::EnqueueFailed(format!("cannot serialize message: {e}")))
    }
}

/// Custom Debug implementation that redacts the token and ordering key.
impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("token", &"[REDACTED]")
            .field("prompt_bytes", &self.prompt.len())
            .field("idle_minutes", &self.idle_minutes)
            .field("request_id", &self.request_id)
            .field("ordering_key", &"[REDACTED]")
            .finish()
    }
}

/// A durable, per-key ordered message channel.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publish one message and return the backend's message id.
    async fn publish(&self, message: &QueueMessage) -> Result<String, InfraError>;

    /// Backend name, used in logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// Build the queue backend described by `target`.
///
/// # Errors
///
/// Returns `InfraError::EnqueueFailed` if the backend cannot be reached at
/// startup (Redis only; HTTP connects lazily).
pub async fn connect_queue(
    target: &QueueTarget,
    http_client: reqwest::Client,
    timeout: Duration,
) -> Result<Arc<dyn MessageQueue>, InfraError> {
    let queue: Arc<dyn MessageQueue> = match target {
        QueueTarget::Http {
            endpoint,
            queue_url,
        } => Arc::new(HttpQueue::new(
            endpoint.clone(),
            queue_url.clone(),
            http_client,
        )),
        QueueTarget::Redis { url, stream } => {
            Arc::new(RedisStreamQueue::connect(url, stream.clone(), timeout).await?)
        }
        QueueTarget::Memory => Arc::new(InMemoryQueue::new()),
    };

    tracing::info!(target: "router.queue", backend = queue.backend_name(), "Queue backend ready");
    Ok(queue)
}

/// Publishes admitted requests through a [`MessageQueue`].
#[derive(Clone)]
pub struct Enqueuer {
    queue: Arc<dyn MessageQueue>,
}

impl Enqueuer {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Publish `message` and return its message id.
    ///
    /// # Errors
    ///
    /// Returns `InfraError::EnqueueFailed` on any transport or service-side
    /// rejection, or when the backend returns an empty id.
    #[instrument(skip_all, name = "router.queue.enqueue", fields(request_id = %message.request_id()))]
    pub async fn enqueue(&self, message: QueueMessage) -> Result<String, InfraError> {
        let backend = self.queue.backend_name();

        let result = match self.queue.publish(&message).await {
            Ok(id) if id.is_empty() => Err(InfraError::EnqueueFailed(
                "backend returned an empty message id".to_string(),
            )),
            other => other,
        };

        match &result {
            Ok(message_id) => {
                metrics::record_enqueue(backend, "success");
                tracing::debug!(
                    target: "router.queue",
                    backend = backend,
                    message_id = %message_id,
                    "Message enqueued"
                );
            }
            Err(e) => {
                metrics::record_enqueue(backend, "error");
                tracing::error!(target: "router.queue", backend = backend, error = %e, "Enqueue failed");
            }
        }

        result
    }

    pub fn backend_name(&self) -> &'static str {
        self.queue.backend_name()
    }
}

impl fmt::Debug for Enqueuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enqueuer")
            .field("backend", &self.queue.backend_name())
            .finish()
    }
}

/// Mock queue for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock queue that accepts or fails every publish.
    pub struct MockQueue {
        /// Number of calls made.
        call_count: AtomicUsize,
        /// Whether to return errors.
        return_error: bool,
        /// Fixed message id to return, if any.
        message_id: Option<String>,
    }

    impl MockQueue {
        /// Create a mock that accepts every message with a fresh id.
        pub fn accepting() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                return_error: false,
                message_id: None,
            }
        }

        /// Create a mock that accepts every message with the given id.
        pub fn with_message_id(message_id: &str) -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                return_error: false,
                message_id: Some(message_id.to_string()),
            }
        }

        /// Create a mock that rejects every message.
        pub fn failing() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                return_error: true,
                message_id: None,
            }
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageQueue for MockQueue {
        async fn publish(&self, _message: &QueueMessage) -> Result<String, InfraError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            if self.return_error {
                return Err(InfraError::EnqueueFailed("Mock queue error".to_string()));
            }

            Ok(self
                .message_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
        }

        fn backend_name(&self) -> &'static str {
            "mock"
        }
    }
}
