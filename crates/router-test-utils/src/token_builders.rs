//! Builder patterns for test token construction
//!
//! Provides fluent APIs for signed RS256 tokens and for structurally valid
//! tokens the router must reject.

use crate::crypto_fixtures::{FixtureError, TestSigningKey};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use serde_json::json;

/// Builder for creating test JWTs
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_subject("alice")
///     .issued_by("http://idp.test/pool-1")
///     .for_audience("client-1")
///     .expires_in(3600)
///     .sign(&TestSigningKey::primary())?;
/// ```
pub struct TestTokenBuilder {
    sub: Option<String>,
    iss: String,
    aud: serde_json::Value,
    exp: i64,
    iat: i64,
    kid: Option<Option<String>>,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: Some("test-subject".to_string()),
            iss: String::new(),
            aud: json!("test-client"),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            kid: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the subject
    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = Some(subject.to_string());
        self
    }

    /// Omit `sub` entirely
    pub fn without_subject(mut self) -> Self {
        self.sub = None;
        self
    }

    /// Set the issuer
    pub fn issued_by(mut self, issuer: &str) -> Self {
        self.iss = issuer.to_string();
        self
    }

    /// Set a single audience (serialized as a string)
    pub fn for_audience(mut self, audience: &str) -> Self {
        self.aud = json!(audience);
        self
    }

    /// Set several audiences (serialized as an array)
    pub fn for_audiences(mut self, audiences: &[&str]) -> Self {
        self.aud = json!(audiences);
        self
    }

    /// Set expiration in seconds from now (negative for an expired token)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set an absolute expiration timestamp
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.exp = timestamp;
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Override the header `kid` (the signing key's id is used otherwise)
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(Some(kid.to_string()));
        self
    }

    /// Leave `kid` out of the header
    pub fn without_kid(mut self) -> Self {
        self.kid = Some(None);
        self
    }

    /// Add an arbitrary claim
    pub fn with_claim(mut self, name: &str, value: serde_json::Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Build the claims as a JSON value
    pub fn claims(&self) -> serde_json::Value {
        let mut claims = self.extra.clone();
        if let Some(sub) = &self.sub {
            claims.insert("sub".to_string(), json!(sub));
        }
        claims.insert("iss".to_string(), json!(self.iss));
        claims.insert("aud".to_string(), self.aud.clone());
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("iat".to_string(), json!(self.iat));
        serde_json::Value::Object(claims)
    }

    fn header_kid(&self, key: &TestSigningKey) -> Option<String> {
        match &self.kid {
            Some(kid) => kid.clone(),
            None => Some(key.kid().to_string()),
        }
    }

    /// Sign with RS256.
    pub fn sign(&self, key: &TestSigningKey) -> Result<String, FixtureError> {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = self.header_kid(key);

        encode(&header, &self.claims(), &key.encoding_key()?)
            .map_err(|e| FixtureError::Crypto(format!("Failed to sign test token: {}", e)))
    }

    /// Assemble a token whose header claims `alg` and whose signature is
    /// garbage. Useful for algorithm-confusion cases (`none`, `HS256`).
    pub fn forge_with_alg(&self, alg: &str, key: &TestSigningKey) -> String {
        let mut header = json!({ "alg": alg, "typ": "JWT" });
        if let Some(kid) = self.header_kid(key) {
            header["kid"] = json!(kid);
        }
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(self.claims().to_string()),
            URL_SAFE_NO_PAD.encode(b"not-a-signature")
        )
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Flip one bit in the signature of a compact JWS.
///
/// The token keeps its shape and its header, so only signature
/// verification can reject it.
pub fn tamper_signature(token: &str) -> String {
    let (signed, signature) = token.rsplit_once('.').expect("token must have three segments");
    let mut bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .expect("signature must be base64url");
    bytes[0] ^= 0x01;
    format!("{}.{}", signed, URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode the claims segment without verifying anything.
pub fn decode_claims(token: &str) -> serde_json::Value {
    let payload = token.split('.').nth(1).expect("token must have a payload");
    let bytes = URL_SAFE_NO_PAD.decode(payload).expect("payload must be base64url");
    serde_json::from_slice(&bytes).expect("payload must be JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_claims() {
        let claims = TestTokenBuilder::new().claims();

        assert_eq!(claims["sub"], "test-subject");
        assert_eq!(claims["aud"], "test-client");
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());
    }

    #[test]
    fn test_builder_overrides() {
        let claims = TestTokenBuilder::new()
            .for_subject("alice")
            .issued_by("http://idp.test/pool")
            .for_audiences(&["a", "b"])
            .expires_at(1_700_000_000)
            .with_claim("scope", json!("prompts:write"))
            .claims();

        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["iss"], "http://idp.test/pool");
        assert_eq!(claims["aud"], json!(["a", "b"]));
        assert_eq!(claims["exp"], 1_700_000_000);
        assert_eq!(claims["scope"], "prompts:write");
    }

    #[test]
    fn test_without_subject() {
        let claims = TestTokenBuilder::new().without_subject().claims();
        assert!(claims.get("sub").is_none());
    }

    #[test]
    fn test_sign_uses_key_kid() {
        let key = TestSigningKey::primary();
        let token = TestTokenBuilder::new().sign(&key).unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();

        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(key.kid()));
    }

    #[test]
    fn test_sign_without_kid() {
        let token = TestTokenBuilder::new()
            .without_kid()
            .sign(&TestSigningKey::primary())
            .unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();

        assert!(header.kid.is_none());
    }

    #[test]
    fn test_forge_with_alg() {
        let token = TestTokenBuilder::new().forge_with_alg("none", &TestSigningKey::primary());
        let header_segment = token.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_segment).unwrap()).unwrap();

        assert_eq!(header["alg"], "none");
        assert_eq!(header["kid"], TestSigningKey::primary().kid());
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn test_tamper_signature_changes_only_signature() {
        let token = TestTokenBuilder::new()
            .sign(&TestSigningKey::primary())
            .unwrap();
        let tampered = tamper_signature(&token);

        assert_ne!(token, tampered);
        assert_eq!(
            token.rsplit_once('.').unwrap().0,
            tampered.rsplit_once('.').unwrap().0
        );
        assert_eq!(decode_claims(&tampered), decode_claims(&token));
    }
}
