//! JWT utilities shared across Prompt Router crates.
//!
//! This module provides the pre-verification half of token handling:
//! - Size limits for DoS prevention
//! - Expiry leeway constants
//! - Unverified header parsing (algorithm and key ID extraction)
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Header values are only used to select a key from a trusted key set; the
//!   signature MUST still be verified afterwards
//! - The only accepted signing algorithm is [`PINNED_ALGORITHM`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{parse_header, PINNED_ALGORITHM};
//!
//! let header = parse_header(token)?;
//! if header.alg.as_deref() != Some(PINNED_ALGORITHM) {
//!     // reject: algorithm confusion
//! }
//! let key = key_ring.lookup(&header.kid).await?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before any base64 decoding or
/// cryptographic work. Identity-provider tokens are typically 800-1500 bytes
/// (RS256 signature plus user-pool claims), so 8KB leaves ample headroom.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// The only signing algorithm accepted for bearer tokens.
pub const PINNED_ALGORITHM: &str = "RS256";

/// Default leeway applied to the `exp` check.
///
/// Zero: a token is expired as soon as the current time passes `exp`.
pub const DEFAULT_EXP_LEEWAY: Duration = Duration::from_secs(0);

/// Maximum configurable `exp` leeway (10 minutes).
pub const MAX_EXP_LEEWAY: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while inspecting a token before signature verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtHeaderError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Token is not three dot-separated segments, or the header segment is
    /// not base64url-encoded JSON.
    #[error("token is malformed")]
    MalformedToken,

    /// Header has no usable `kid`.
    #[error("token header has no key id")]
    MissingKid,
}

// =============================================================================
// Header Types
// =============================================================================

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<serde_json::Value>,
}

/// Unverified JWT header fields used for key selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Declared algorithm. Never trusted for verification, only compared
    /// against [`PINNED_ALGORITHM`].
    pub alg: Option<String>,

    /// Key ID selecting the verification key.
    pub kid: String,
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWS into its three segments.
///
/// Returns `None` unless the token has exactly three dot-separated segments.
#[must_use]
pub fn split_segments(token: &str) -> Option<(&str, &str, &str)> {
    let mut parts = token.split('.');
    let header = parts.next()?;
    let payload = parts.next()?;
    let signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((header, payload, signature))
}

/// Parse the JWT header without verifying the signature.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - wrong segment count, bad base64, or invalid JSON
/// - `MissingKid` - header has no `kid`, or `kid` is not a non-empty string
pub fn parse_header(token: &str) -> Result<TokenHeader, JwtHeaderError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtHeaderError::TokenTooLarge);
    }

    let Some((header_part, _, _)) = split_segments(token) else {
        tracing::debug!(
            target: "common.jwt",
            parts = token.split('.').count(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtHeaderError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtHeaderError::MalformedToken
    })?;

    let raw: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtHeaderError::MalformedToken
    })?;

    // kid must be a non-empty string; numbers, null and "" are all rejected
    let kid = raw
        .kid
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtHeaderError::MissingKid)?;

    Ok(TokenHeader {
        alg: raw.alg,
        kid,
    })
}
