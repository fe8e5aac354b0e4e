//! Admission pipeline.
//!
//! [`RequestHandler`] runs one invocation through
//! `Received -> Authenticated -> Validated -> Enqueued -> Responded`.
//! Any stage may reject; a rejection becomes a status code plus
//! `{"error": <code>, "details"?: <string>}`.
//!
//! # Security
//!
//! - Authentication runs before the body is inspected
//! - The bearer token and the subject are never logged
//! - Upstream failure details are logged here and never returned

use crate::auth::JwtVerifier;
use crate::errors::RouterError;
use crate::observability::metrics;
use crate::queue::{Enqueuer, QueueMessage};
use crate::validation::SchemaValidator;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Header carrying a caller-supplied correlation id on the HTTP transport.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller correlation id kept for logging.
const MAX_CORRELATION_ID_CHARS: usize = 128;

/// States of one admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStage {
    Received,
    Authenticated,
    Validated,
    Enqueued,
    Responded,
    Rejected,
}

impl AdmissionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionStage::Received => "received",
            AdmissionStage::Authenticated => "authenticated",
            AdmissionStage::Validated => "validated",
            AdmissionStage::Enqueued => "enqueued",
            AdmissionStage::Responded => "responded",
            AdmissionStage::Rejected => "rejected",
        }
    }
}

/// One inbound invocation.
///
/// Wire shape: `{"headers": {...}, "body": "<json string>", "request_id"?: "..."}`.
///
/// `request_id` is the caller's correlation id. It is logged and never
/// forwarded: the queued message always carries a server-generated id.
#[derive(Clone, Default, Deserialize)]
pub struct InvocationEvent {
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub request_id: Option<String>,
}

impl InvocationEvent {
    pub fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        Self {
            headers,
            body,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Build an event from HTTP request parts. Non-UTF-8 header values are
    /// dropped; `x-request-id` becomes the caller correlation id.
    pub fn from_http(headers: &HeaderMap, body: Option<String>) -> Self {
        let headers: HashMap<String, String> = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Self {
            headers,
            body,
            request_id,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Custom Debug implementation that lists header names only.
impl fmt::Debug for InvocationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort();
        f.debug_struct("InvocationEvent")
            .field("headers", &names)
            .field("body_bytes", &self.body.as_ref().map(String::len))
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Handler result: `{"statusCode": <u16>, "body": "<json string>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

#[derive(Serialize)]
struct AcceptedBody<'a> {
    status: &'static str,
    message_id: &'a str,
}

impl InvocationResponse {
    /// 202 with `{"status":"queued","message_id":...}`.
    pub fn accepted(message_id: &str) -> Self {
        let body = serde_json::to_string(&AcceptedBody {
            status: "queued",
            message_id,
        })
        .unwrap_or_else(|_| r#"{"status":"queued"}"#.to_string());
        Self {
            status_code: 202,
            body,
        }
    }

    pub fn rejected(error: &RouterError) -> Self {
        let body = serde_json::to_string(&error.to_body())
            .unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string());
        Self {
            status_code: error.status_code(),
            body,
        }
    }

    /// The body parsed as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

impl IntoResponse for InvocationResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = (status, self.body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
///
/// The scheme is matched case-insensitively and surrounding whitespace is
/// trimmed. Returns `None` for any other scheme or an empty token.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let (scheme, token) = authorization?.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

/// Caller correlation id, trimmed and capped for logging.
fn correlation_id(event: &InvocationEvent) -> Option<String> {
    event
        .request_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.chars().take(MAX_CORRELATION_ID_CHARS).collect())
}

struct Rejection {
    stage: AdmissionStage,
    error: RouterError,
}

/// Orchestrates verification, validation and enqueueing for one invocation.
#[derive(Debug)]
pub struct RequestHandler {
    verifier: Arc<JwtVerifier>,
    validator: SchemaValidator,
    enqueuer: Enqueuer,
}

impl RequestHandler {
    pub fn new(verifier: Arc<JwtVerifier>, validator: SchemaValidator, enqueuer: Enqueuer) -> Self {
        Self {
            verifier,
            validator,
            enqueuer,
        }
    }

    /// Run one invocation to completion. Never fails: every outcome is a
    /// response.
    ///
    /// The request id placed on the queue (and used as the deduplication
    /// id) is a fresh UUID v4 per invocation. A caller-supplied id only
    /// appears in logs as `correlation_id`.
    #[instrument(
        skip_all,
        name = "router.handler.admit",
        fields(request_id = tracing::field::Empty, correlation_id = tracing::field::Empty)
    )]
    pub async fn handle(&self, event: InvocationEvent) -> InvocationResponse {
        let start = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::Span::current();
        span.record("request_id", request_id.as_str());
        if let Some(correlation_id) = correlation_id(&event) {
            span.record("correlation_id", correlation_id.as_str());
        }

        let (response, outcome) = match self.admit(&event, &request_id).await {
            Ok(message_id) => {
                tracing::info!(
                    target: "router.handler",
                    stage = AdmissionStage::Responded.as_str(),
                    message_id = %message_id,
                    "Prompt queued"
                );
                (InvocationResponse::accepted(&message_id), "queued")
            }
            Err(Rejection { stage, error }) => {
                let code = error.error_code();
                if error.is_retryable() {
                    tracing::error!(
                        target: "router.handler",
                        stage = AdmissionStage::Rejected.as_str(),
                        rejected_at = stage.as_str(),
                        error_code = code,
                        error = %error,
                        "Request rejected: upstream failure"
                    );
                } else {
                    tracing::info!(
                        target: "router.handler",
                        stage = AdmissionStage::Rejected.as_str(),
                        rejected_at = stage.as_str(),
                        error_code = code,
                        error = %error,
                        "Request rejected"
                    );
                }
                (InvocationResponse::rejected(&error), code)
            }
        };

        metrics::record_admission(outcome, response.status_code, start.elapsed());
        response
    }

    async fn admit(&self, event: &InvocationEvent, request_id: &str) -> Result<String, Rejection> {
        let reject = |stage: AdmissionStage| {
            move |error: RouterError| Rejection { stage, error }
        };

        let token = bearer_token(event.header("authorization"))
            .ok_or(RouterError::MissingToken)
            .map_err(reject(AdmissionStage::Received))?;

        let claims = self
            .verifier
            .verify(token)
            .await
            .map_err(reject(AdmissionStage::Received))?;
        tracing::debug!(target: "router.handler", stage = AdmissionStage::Authenticated.as_str());

        let request = self
            .validator
            .validate(event.body.as_deref())
            .map_err(|e| reject(AdmissionStage::Authenticated)(e.into()))?;
        tracing::debug!(
            target: "router.handler",
            stage = AdmissionStage::Validated.as_str(),
            prompt_bytes = request.prompt().len(),
            idle_minutes = request.idle_minutes()
        );

        let message = QueueMessage::new(
            SecretString::from(token.to_string()),
            request,
            request_id.to_string(),
            claims.subject().to_string(),
        );
        let message_id = self
            .enqueuer
            .enqueue(message)
            .await
            .map_err(|e| reject(AdmissionStage::Validated)(e.into()))?;
        tracing::debug!(target: "router.handler", stage = AdmissionStage::Enqueued.as_str());

        Ok(message_id)
    }
}
