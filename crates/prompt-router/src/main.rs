//! Prompt Router
//!
//! Entry point for the prompt admission service.

use prompt_router::admission::RequestHandler;
use prompt_router::auth::{JwtVerifier, KeyRing, KeySource};
use prompt_router::clock::{Clock, SystemClock};
use prompt_router::config::Config;
use prompt_router::observability::metrics::init_metrics_recorder;
use prompt_router::params::ParameterResolver;
use prompt_router::queue::{connect_queue, Enqueuer};
use prompt_router::routes::{self, AppState};
use prompt_router::upstream_client;
use prompt_router::validation::SchemaValidator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "prompt_router=info,tower_http=info".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Prompt Router");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        deploy_env = %config.deploy_env,
        bind_address = %config.bind_address,
        parameter_source = config.parameter_source.name(),
        queue_backend = config.queue.name(),
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let http_client = upstream_client(config.upstream_timeout);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let resolver = Arc::new(ParameterResolver::from_config(&config, http_client.clone()));

    let key_source = match &config.local_jwks_path {
        Some(path) => {
            warn!(path = %path.display(), "Using local key set override");
            KeySource::LocalFile(path.clone())
        }
        None => KeySource::Remote {
            resolver: Arc::clone(&resolver),
            idp_base_url: config.idp_base_url.clone(),
            http_client: http_client.clone(),
        },
    };
    let key_ring = Arc::new(KeyRing::new(
        key_source,
        Arc::clone(&clock),
        config.jwks_min_refresh_interval,
    ));

    let verifier = Arc::new(JwtVerifier::new(
        Arc::clone(&key_ring),
        Arc::clone(&resolver),
        config.idp_base_url.clone(),
        clock,
        config.jwt_clock_skew_seconds,
    ));

    let queue = connect_queue(&config.queue, http_client, config.upstream_timeout)
        .await
        .map_err(|e| {
            error!("Failed to initialize queue backend: {}", e);
            e
        })?;

    let request_handler = Arc::new(RequestHandler::new(
        verifier,
        SchemaValidator::new(),
        Enqueuer::new(queue),
    ));

    // Warm the key cache; a miss later retries, so failure is not fatal
    match key_ring.refresh().await {
        Ok(count) => info!(keys = count, "Signing keys loaded"),
        Err(e) => warn!(error = %e, "Initial key set fetch failed, will retry on demand"),
    }

    let bind_address = config.bind_address.clone();

    // Create application state
    let state = Arc::new(AppState {
        config,
        request_handler,
        key_ring,
    });

    // Build application routes
    let app = routes::build_routes(state, metrics_handle);

    // Parse bind address
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Prompt Router listening on {}", addr);

    // Start server with graceful shutdown support
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Prompt Router shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let drain_secs: u64 = std::env::var("ROUTER_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (ROUTER_DRAIN_SECONDS=0)");
    }
}
