//! Prompt submission handler.
//!
//! Adapts `POST /v1/prompts` onto [`RequestHandler`](crate::admission::RequestHandler).
//! Header names are forwarded as-is; the body is passed through verbatim.

use crate::admission::{InvocationEvent, InvocationResponse};
use crate::routes::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use std::sync::Arc;

/// Handler for POST /v1/prompts
///
/// ## Responses
///
/// - 202 `{"status": "queued", "message_id": "..."}`
/// - 400 `invalid_request` / `schema_invalid`
/// - 401 `missing_token` / `invalid_token` / `token_expired`
/// - 403 `invalid_token`
/// - 502 upstream failure
///
/// An empty or non-UTF-8 body is treated as absent.
pub async fn submit_prompt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> InvocationResponse {
    let body = String::from_utf8(body.to_vec())
        .ok()
        .filter(|text| !text.is_empty());

    state
        .request_handler
        .handle(InvocationEvent::from_http(&headers, body))
        .await
}
