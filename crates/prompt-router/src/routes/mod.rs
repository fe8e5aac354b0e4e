//! HTTP routes for the Prompt Router.
//!
//! Defines the Axum router and application state.

use crate::admission::{InvocationResponse, RequestHandler};
use crate::auth::KeyRing;
use crate::config::Config;
use crate::errors::RouterError;
use crate::handlers;
use crate::observability::http_metrics::http_metrics_middleware;
use axum::{
    error_handling::HandleErrorLayer,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::{error::Elapsed, TimeoutLayer};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// Server-side deadline for one request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Admission pipeline.
    pub request_handler: Arc<RequestHandler>,

    /// Shared with the verifier inside `request_handler`; read by `/health`.
    pub key_ring: Arc<KeyRing>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/prompts` - Prompt admission (bearer token checked by the handler)
/// - `/health` - Liveness probe - public, unversioned
/// - `/metrics` - Prometheus metrics endpoint - public, unversioned
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout (408 `request_timeout`)
/// - Panic recovery (502 `internal_error`)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let app_routes = Router::new()
        .route("/v1/prompts", post(handlers::submit_prompt))
        .route("/health", get(handlers::health_check))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    with_request_guards(app_routes.merge(metrics_routes), REQUEST_TIMEOUT)
}

/// Wrap a router in the shared middleware stack.
///
/// Layer order (bottom-to-top execution):
/// 1. CatchPanicLayer - Panic becomes 502 `internal_error` (innermost)
/// 2. TraceLayer - Log request details
/// 3. TimeoutLayer - Elapsed deadline becomes 408 `request_timeout`
/// 4. http_metrics_middleware - Record ALL responses (outermost)
fn with_request_guards(router: Router, timeout: Duration) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(middleware_error_response))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// Map middleware errors onto the rejection body shape.
async fn middleware_error_response(error: BoxError) -> InvocationResponse {
    let error = if error.is::<Elapsed>() {
        tracing::warn!(target: "router.http", "Request exceeded server deadline");
        RouterError::Timeout
    } else {
        tracing::error!(target: "router.http", error = %error, "Unhandled middleware error");
        RouterError::Internal(error.to_string())
    };
    InvocationResponse::rejected(&error)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(target: "router.http", panic = message, "Request handler panicked");
    InvocationResponse::rejected(&RouterError::Internal(message.to_string())).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::{JwtVerifier, KeySource};
    use crate::clock::{Clock, FixedClock};
    use crate::params::ParameterResolver;
    use crate::queue::mock::MockQueue;
    use crate::queue::Enqueuer;
    use crate::validation::SchemaValidator;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let vars = HashMap::from([
            ("QUEUE_BACKEND".to_string(), "memory".to_string()),
            ("PARAM_CLIENT_ID".to_string(), "client".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_700_000_000));
        let resolver = Arc::new(ParameterResolver::from_config(&config, reqwest::Client::new()));
        let key_ring = Arc::new(KeyRing::new(
            KeySource::LocalFile(std::env::temp_dir().join("router-routes-no-such-jwks.json")),
            Arc::clone(&clock),
            Duration::from_secs(30),
        ));
        let verifier = Arc::new(JwtVerifier::new(
            Arc::clone(&key_ring),
            resolver,
            config.idp_base_url.clone(),
            clock,
            0,
        ));
        let request_handler = Arc::new(RequestHandler::new(
            verifier,
            SchemaValidator::new(),
            Enqueuer::new(Arc::new(MockQueue::accepting())),
        ));
        let state = Arc::new(AppState {
            config,
            request_handler,
            key_ring,
        });

        build_routes(state, PrometheusBuilder::new().build_recorder().handle())
    }

    #[tokio::test]
    async fn test_prompts_without_token_is_401() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/prompts")
            .body(Body::from(r#"{"prompt":"hi","idle":5}"#))
            .unwrap();

        let response = test_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "missing_token");
    }

    /// The key source is unreachable, which surfaces as a 502.
    #[tokio::test]
    async fn test_prompts_with_unreachable_key_source_is_502() {
        let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0.e30.c2ln";
        let request = Request::builder()
            .method("POST")
            .uri("/v1/prompts")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(r#"{"prompt":"hi","idle":5}"#))
            .unwrap();

        let response = test_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "key_source_unavailable");
    }

    #[tokio::test]
    async fn test_health_route() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = test_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["cached_signing_keys"], 0);
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();

        let response = test_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn read_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_elapsed_deadline_is_json_408() {
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }
        let app = with_request_guards(
            Router::new().route("/slow", get(slow)),
            Duration::from_millis(20),
        );
        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(read_json(response).await, serde_json::json!({"error": "request_timeout"}));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_json_502() {
        async fn explode() -> &'static str {
            panic!("handler exploded")
        }
        let app = with_request_guards(Router::new().route("/boom", get(explode)), REQUEST_TIMEOUT);
        let request = Request::builder().uri("/boom").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = read_json(response).await;
        assert_eq!(json, serde_json::json!({"error": "internal_error"}));
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_config_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Config>();
    }
}
