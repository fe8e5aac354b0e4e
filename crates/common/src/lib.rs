//! Common utilities and types shared across Prompt Router crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (header parsing, size limits, leeway constants)
pub mod jwt;
