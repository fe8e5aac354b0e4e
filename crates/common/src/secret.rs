//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Bearer tokens
//! travel through the admission pipeline as `SecretString` so that any struct
//! deriving `Debug` around them (queue messages, invocation events) redacts the
//! value automatically.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Outbound {
//!     request_id: String,
//!     token: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let msg = Outbound {
//!     request_id: "req-1".to_string(),
//!     token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! assert!(!format!("{msg:?}").contains("eyJhbGciOi"));
//! assert_eq!(msg.token.expose_secret(), "eyJhbGciOi...");
//! ```
//!
//! Use `SecretString` for bearer tokens, queue credentials embedded in URLs,
//! and anything else that must never reach a log line.

pub use secrecy::{ExposeSecret, SecretString};
