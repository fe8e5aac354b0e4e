//! SQS-compatible JSON queue client.
//!
//! Sends `AmazonSQS.SendMessage` over the JSON 1.0 protocol. The subject is
//! the message group id (FIFO ordering) and the request id is the
//! deduplication id. Requests are unsigned; deploy behind a signing proxy or
//! a gateway that accepts the service identity.

use super::{MessageQueue, QueueMessage};
use crate::errors::InfraError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const SEND_MESSAGE_TARGET: &str = "AmazonSQS.SendMessage";
const JSON_1_0_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest<'a> {
    queue_url: &'a str,
    message_body: String,
    message_group_id: &'a str,
    message_deduplication_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct ServiceError {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
}

#[derive(Debug)]
pub struct HttpQueue {
    endpoint: String,
    queue_url: String,
    http_client: reqwest::Client,
}

impl HttpQueue {
    /// The client's timeout bounds every publish.
    pub fn new(endpoint: String, queue_url: String, http_client: reqwest::Client) -> Self {
        Self {
            endpoint,
            queue_url,
            http_client,
        }
    }
}

#[async_trait]
impl MessageQueue for HttpQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<String, InfraError> {
        let request = SendMessageRequest {
            queue_url: &self.queue_url,
            message_body: message.body_json()?,
            message_group_id: message.ordering_key(),
            message_deduplication_id: message.request_id(),
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| InfraError::EnqueueFailed(format!("cannot serialize request: {e}")))?;

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("X-Amz-Target", SEND_MESSAGE_TARGET)
            .header(reqwest::header::CONTENT_TYPE, JSON_1_0_CONTENT_TYPE)
            .body(payload)
            .send()
            .await
            .map_err(|e| InfraError::EnqueueFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_type = response
                .json::<ServiceError>()
                .await
                .ok()
                .and_then(|e| e.error_type)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(InfraError::EnqueueFailed(format!(
                "queue returned {status} ({error_type})"
            )));
        }

        let body: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| InfraError::EnqueueFailed(format!("invalid response: {e}")))?;

        Ok(body.message_id)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
