//! Verified token claims.
//!
//! [`Claims`] is only constructed by the verifier after every check passed.
//! The subject identifies an end user, so it is redacted in Debug output.

use serde::Deserialize;
use std::fmt;

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// Claims payload as it appears on the wire, before semantic checks.
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    pub sub: String,
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Claims of a successfully verified token.
#[derive(Clone)]
pub struct Claims {
    subject: String,
    issuer: String,
    audience: Vec<String>,
    issued_at: Option<i64>,
    expires_at: i64,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    pub(crate) fn from_raw(raw: RawClaims) -> Self {
        Self {
            subject: raw.sub,
            issuer: raw.iss,
            audience: raw.aud.into_vec(),
            issued_at: raw.iat,
            expires_at: raw.exp,
            extra: raw.extra,
        }
    }

    /// The caller's identity; used as the queue ordering key.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.issued_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Custom claims not covered by the registered fields (e.g. `token_use`).
    pub fn custom(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}

/// Custom Debug implementation that redacts the subject.
impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("subject", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("custom", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}
