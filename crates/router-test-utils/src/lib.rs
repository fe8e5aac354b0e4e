//! # Router Test Utilities
//!
//! Shared test utilities for the Prompt Router.
//!
//! This crate provides:
//! - Fixed RSA signing keys and JWKS documents (`crypto_fixtures`)
//! - Token construction and tampering (`token_builders`)
//! - Server test harness (`TestRouterServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use router_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestRouterServer::spawn().await?;
//!     let token = server.token_builder().sign(&TestSigningKey::primary())?;
//!
//!     let response = reqwest::Client::new()
//!         .post(format!("{}/v1/prompts", server.url()))
//!         .bearer_auth(token)
//!         .body(r#"{"prompt":"hello","idle":5}"#)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 202);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
