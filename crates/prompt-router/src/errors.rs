//! Prompt Router error types.
//!
//! Three families of failure flow through the admission pipeline:
//!
//! - [`AuthError`] - the bearer token was rejected (permanent, 401/403)
//! - [`ValidationError`] - the request body was rejected (permanent, 400)
//! - [`InfraError`] - a collaborator failed (transient, 502)
//!
//! [`RouterError`] wraps all three and owns the mapping to status code and
//! client-facing error code. Messages returned to clients are intentionally
//! short; upstream failure details are logged server-side only.

use serde::Serialize;
use thiserror::Error;

/// Bearer token verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token is empty")]
    EmptyToken,

    #[error("token is malformed")]
    MalformedToken,

    #[error("token header has no key id")]
    MissingKeyId,

    #[error("token signing key is unknown")]
    UnknownKey,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    ExpiredToken,

    #[error("token audience is invalid")]
    InvalidAudience,

    #[error("token issuer is invalid")]
    InvalidIssuer,
}

/// Request body validation failures.
///
/// Every variant names the offending field via [`ValidationError::field`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request body is not a JSON object: {0}")]
    InvalidJson(String),

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("prompt must be 1-6144 UTF-8 bytes; got {actual} B")]
    PromptOutOfBounds { actual: usize },

    #[error("idle must be 1-30; got {actual}")]
    IdleOutOfBounds { actual: i64 },
}

impl ValidationError {
    /// Name of the field that failed validation (`body` for unparsable JSON).
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::InvalidJson(_) => "body",
            ValidationError::MissingField { field } | ValidationError::WrongType { field, .. } => {
                field
            }
            ValidationError::PromptOutOfBounds { .. } => "prompt",
            ValidationError::IdleOutOfBounds { .. } => "idle",
        }
    }

    /// Human-readable reason, suitable for the response `details`.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Bounds failures are schema violations; everything else means the
    /// request was not shaped like a prompt request at all.
    pub fn is_bounds_violation(&self) -> bool {
        matches!(
            self,
            ValidationError::PromptOutOfBounds { .. } | ValidationError::IdleOutOfBounds { .. }
        )
    }
}

/// Failures of external collaborators (key-set source, parameter store, queue).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InfraError {
    #[error("key set source unavailable: {0}")]
    KeySourceUnavailable(String),

    #[error("parameter '{name}' unavailable: {reason}")]
    ParameterUnavailable { name: String, reason: String },

    #[error("enqueue failed: {0}")]
    EnqueueFailed(String),
}

/// Top-level error for one admission attempt.
///
/// Maps to HTTP status codes:
/// - MissingToken, structural/expired Auth: 401 Unauthorized
/// - Signature/audience/issuer Auth: 403 Forbidden
/// - Validation: 400 Bad Request
/// - Timeout: 408 Request Timeout
/// - Infra, Internal: 502 Bad Gateway
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("missing bearer token")]
    MissingToken,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Infra(#[from] InfraError),

    #[error("request exceeded the server deadline")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON body of every rejected request: `{"error": ..., "details"?: ...}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RouterError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            RouterError::MissingToken => 401,
            RouterError::Auth(err) => match err {
                AuthError::InvalidSignature
                | AuthError::InvalidAudience
                | AuthError::InvalidIssuer => 403,
                AuthError::EmptyToken
                | AuthError::MalformedToken
                | AuthError::MissingKeyId
                | AuthError::UnknownKey
                | AuthError::ExpiredToken => 401,
            },
            RouterError::Validation(_) => 400,
            RouterError::Timeout => 408,
            RouterError::Infra(_) | RouterError::Internal(_) => 502,
        }
    }

    /// Returns the stable, client-facing error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            RouterError::MissingToken | RouterError::Auth(AuthError::EmptyToken) => "missing_token",
            RouterError::Auth(AuthError::ExpiredToken) => "token_expired",
            RouterError::Auth(_) => "invalid_token",
            RouterError::Validation(err) if err.is_bounds_violation() => "schema_invalid",
            RouterError::Validation(_) => "invalid_request",
            RouterError::Infra(InfraError::KeySourceUnavailable(_)) => "key_source_unavailable",
            RouterError::Infra(InfraError::ParameterUnavailable { .. }) => "parameter_unavailable",
            RouterError::Infra(InfraError::EnqueueFailed(_)) => "enqueue_failed",
            RouterError::Timeout => "request_timeout",
            RouterError::Internal(_) => "internal_error",
        }
    }

    /// Optional detail string for the response body.
    ///
    /// Only structural token failures and validation failures carry details.
    /// Signature, audience and issuer failures stay generic so the response
    /// does not reveal which check failed; infra failures stay generic so
    /// upstream internals never reach the caller.
    pub fn details(&self) -> Option<String> {
        match self {
            RouterError::Auth(
                err @ (AuthError::MalformedToken | AuthError::MissingKeyId | AuthError::UnknownKey),
            ) => Some(err.to_string()),
            RouterError::Validation(err) => Some(err.reason()),
            _ => None,
        }
    }

    /// Whether a caller may retry the identical request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::Infra(_) | RouterError::Timeout | RouterError::Internal(_)
        )
    }

    /// Build the structured response body.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error_code(),
            details: self.details(),
        }
    }
}
