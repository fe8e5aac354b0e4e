//! Test server harness for E2E testing
//!
//! Provides `TestRouterServer` for spawning real router instances in tests,
//! backed by a wiremock identity provider and an in-process queue.

use crate::crypto_fixtures::{jwks_document, TestSigningKey};
use crate::token_builders::TestTokenBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use prompt_router::admission::RequestHandler;
use prompt_router::auth::{issuer_for, JwtVerifier, KeyRing, KeySource};
use prompt_router::clock::SystemClock;
use prompt_router::config::Config;
use prompt_router::observability::metrics::init_metrics_recorder;
use prompt_router::params::ParameterResolver;
use prompt_router::queue::{Enqueuer, InMemoryQueue, MessageQueue};
use prompt_router::routes::{self, AppState};
use prompt_router::upstream_client;
use prompt_router::validation::SchemaValidator;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Pool id served by the harness parameter store.
pub const TEST_POOL_ID: &str = "eu-test_pool";

/// Audience served by the harness parameter store.
pub const TEST_CLIENT_ID: &str = "test-client";

static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide metrics handle. The global recorder can only be installed
/// once, so later callers share it (or a detached handle if installation
/// failed).
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder().unwrap_or_else(|_| {
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .build_recorder()
                    .handle()
            })
        })
        .clone()
}

/// Test harness for spawning the Prompt Router in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<(), anyhow::Error> {
///     let server = TestRouterServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRouterServer {
    addr: SocketAddr,
    idp: MockServer,
    memory_queue: Option<Arc<InMemoryQueue>>,
    key_ring: Arc<KeyRing>,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestRouterServer {
    /// Spawn with the primary signing key published and an in-memory queue.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_keys(&[&TestSigningKey::primary()]).await
    }

    /// Spawn with `keys` published by the identity provider.
    pub async fn spawn_with_keys(keys: &[&TestSigningKey]) -> Result<Self, anyhow::Error> {
        let memory_queue = Arc::new(InMemoryQueue::new());
        let queue: Arc<dyn MessageQueue> = memory_queue.clone();
        let mut server = Self::spawn_inner(keys, queue).await?;
        server.memory_queue = Some(memory_queue);
        Ok(server)
    }

    /// Spawn with the primary key published and a caller-supplied queue.
    pub async fn spawn_with_queue(queue: Arc<dyn MessageQueue>) -> Result<Self, anyhow::Error> {
        Self::spawn_inner(&[&TestSigningKey::primary()], queue).await
    }

    async fn spawn_inner(
        keys: &[&TestSigningKey],
        queue: Arc<dyn MessageQueue>,
    ) -> Result<Self, anyhow::Error> {
        let idp = MockServer::start().await;
        mount_jwks(&idp, keys).await;

        let vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("DEPLOY_ENV".to_string(), "test".to_string()),
            ("IDP_BASE_URL".to_string(), idp.uri()),
            ("PARAM_ISSUER_POOL_ID".to_string(), TEST_POOL_ID.to_string()),
            ("PARAM_CLIENT_ID".to_string(), TEST_CLIENT_ID.to_string()),
            ("QUEUE_BACKEND".to_string(), "memory".to_string()),
            ("JWKS_MIN_REFRESH_INTERVAL_SECONDS".to_string(), "0".to_string()),
        ]);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let http_client = upstream_client(config.upstream_timeout);
        let resolver = Arc::new(ParameterResolver::from_config(&config, http_client.clone()));
        let key_ring = Arc::new(KeyRing::new(
            KeySource::Remote {
                resolver: Arc::clone(&resolver),
                idp_base_url: config.idp_base_url.clone(),
                http_client,
            },
            Arc::new(SystemClock),
            config.jwks_min_refresh_interval,
        ));
        let verifier = Arc::new(JwtVerifier::new(
            Arc::clone(&key_ring),
            resolver,
            config.idp_base_url.clone(),
            Arc::new(SystemClock),
            config.jwt_clock_skew_seconds,
        ));
        let request_handler = Arc::new(RequestHandler::new(
            verifier,
            SchemaValidator::new(),
            Enqueuer::new(queue),
        ));

        let state = Arc::new(AppState {
            config: config.clone(),
            request_handler,
            key_ring: Arc::clone(&key_ring),
        });

        // Build routes using the router's real route builder
        let app = routes::build_routes(state, test_metrics_handle());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            idp,
            memory_queue: None,
            key_ring,
            config,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The mock identity provider.
    pub fn idp(&self) -> &MockServer {
        &self.idp
    }

    /// The in-memory queue, unless the server was spawned with a custom one.
    pub fn memory_queue(&self) -> Option<&Arc<InMemoryQueue>> {
        self.memory_queue.as_ref()
    }

    pub fn key_ring(&self) -> &Arc<KeyRing> {
        &self.key_ring
    }

    /// Issuer the router expects in `iss`.
    pub fn issuer(&self) -> String {
        issuer_for(&self.config.idp_base_url, TEST_POOL_ID)
    }

    /// Token builder preset with the expected issuer and audience.
    pub fn token_builder(&self) -> TestTokenBuilder {
        TestTokenBuilder::new()
            .issued_by(&self.issuer())
            .for_audience(TEST_CLIENT_ID)
    }

    /// Replace the published key set.
    pub async fn publish_keys(&self, keys: &[&TestSigningKey]) {
        self.idp.reset().await;
        mount_jwks(&self.idp, keys).await;
    }

    /// Number of key-set requests the identity provider has served.
    pub async fn jwks_requests(&self) -> usize {
        self.idp
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|request| request.url.path().ends_with("/.well-known/jwks.json"))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Drop for TestRouterServer {
    fn drop(&mut self) {
        // Explicitly abort the HTTP server task to ensure immediate cleanup
        self._handle.abort();
    }
}

async fn mount_jwks(idp: &MockServer, keys: &[&TestSigningKey]) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/.well-known/jwks.json", TEST_POOL_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
        .mount(idp)
        .await;
}
