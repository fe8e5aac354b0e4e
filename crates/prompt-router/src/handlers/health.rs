//! Health check handler.

use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_backend: &'static str,
    pub cached_signing_keys: usize,
}

/// Liveness probe.
///
/// Always reports healthy while the process can serve requests. An empty key
/// cache is not a failure: keys are fetched on the first cache miss.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "queue_backend": "redis",
///   "cached_signing_keys": 2
/// }
/// ```
#[instrument(skip_all, name = "router.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        queue_backend: state.config.queue.name(),
        cached_signing_keys: state.key_ring.key_count().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_structure() {
        let response = HealthResponse {
            status: "healthy",
            queue_backend: "memory",
            cached_signing_keys: 0,
        };

        let json = serde_json::to_value(&response).unwrap_or_default();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["queue_backend"], "memory");
        assert_eq!(json["cached_signing_keys"], 0);
    }
}
