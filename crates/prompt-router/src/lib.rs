//! Prompt Router Service Library
//!
//! Admits prompt submissions onto a work queue:
//!
//! - Bearer-token verification against a cached JWKS key ring (RS256 only)
//! - Request-body validation (`prompt`, `idle`)
//! - Publishing with the token subject as the ordering key
//! - Memoized deployment parameters (`issuer_pool_id`, `client_id`)
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> admission.rs -> auth/ + validation/ + queue/
//!                                                     \-> params/
//! ```
//!
//! # Modules
//!
//! - `admission` - Request state machine and response mapping
//! - `auth` - Key ring and token verification
//! - `clock` - Injectable time source
//! - `config` - Service configuration from environment
//! - `errors` - Error taxonomy with status code mapping
//! - `handlers` - HTTP request handlers
//! - `observability` - Metrics and HTTP metrics middleware
//! - `params` - Parameter resolution with memoization
//! - `queue` - Queue backends and the enqueuer
//! - `routes` - Axum router setup
//! - `validation` - Body schema validation

pub mod admission;
pub mod auth;
pub mod clock;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod params;
pub mod queue;
pub mod routes;
pub mod validation;

use std::time::Duration;

/// HTTP client shared by the parameter store, key source and HTTP queue.
pub fn upstream_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(target: "router", error = %e, "Failed to build HTTP client with custom config, using defaults");
            reqwest::Client::new()
        })
}
