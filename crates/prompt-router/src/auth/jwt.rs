//! JWT verification for inbound prompt requests.
//!
//! Verifies RS256 tokens minted by the identity provider using keys from the
//! [`KeyRing`].
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The algorithm is pinned to RS256; the header `alg` is never trusted
//! - Expiry, issuer and audience are always checked, in that order
//! - Signature, issuer and audience failures share one client-facing code

use crate::auth::claims::{Claims, RawClaims};
use crate::auth::issuer_for;
use crate::auth::jwks::KeyRing;
use crate::clock::Clock;
use crate::errors::{AuthError, RouterError};
use crate::params::{ParameterResolver, CLIENT_ID, ISSUER_POOL_ID};
use common::jwt::{parse_header, JwtHeaderError, PINNED_ALGORITHM};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// RS256 token verifier.
#[derive(Debug)]
pub struct JwtVerifier {
    key_ring: Arc<KeyRing>,
    resolver: Arc<ParameterResolver>,
    idp_base_url: String,
    clock: Arc<dyn Clock>,
    leeway_seconds: i64,
}

impl JwtVerifier {
    /// Create a new verifier.
    ///
    /// # Arguments
    ///
    /// * `key_ring` - Source of verification keys
    /// * `resolver` - Resolves `issuer_pool_id` and `client_id`
    /// * `idp_base_url` - Identity-provider base URL; the issuer is `{base}/{pool_id}`
    /// * `clock` - Time source for the `exp` check
    /// * `leeway_seconds` - Grace period after `exp`
    pub fn new(
        key_ring: Arc<KeyRing>,
        resolver: Arc<ParameterResolver>,
        idp_base_url: String,
        clock: Arc<dyn Clock>,
        leeway_seconds: i64,
    ) -> Self {
        Self {
            key_ring,
            resolver,
            idp_base_url,
            clock,
            leeway_seconds,
        }
    }

    /// Verify a compact JWS and return its claims.
    ///
    /// # Security Checks
    ///
    /// 1. Size and shape check, then unverified header parse for `kid`
    /// 2. Header `alg` must be RS256
    /// 3. Key lookup via the key ring (may refresh once)
    /// 4. RS256 signature verification
    /// 5. `exp` with leeway, then `iss`, then `aud`
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Auth` for token failures and `RouterError::Infra`
    /// when the key set or parameter store cannot be reached.
    #[instrument(skip_all, name = "router.auth.jwt.verify")]
    pub async fn verify(&self, token: &str) -> Result<Claims, RouterError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken.into());
        }

        let header = parse_header(token).map_err(|e| {
            tracing::debug!(target: "router.auth.jwt", error = %e, "Token header rejected");
            match e {
                JwtHeaderError::TokenTooLarge | JwtHeaderError::MalformedToken => {
                    AuthError::MalformedToken
                }
                JwtHeaderError::MissingKid => AuthError::MissingKeyId,
            }
        })?;

        match header.alg.as_deref() {
            Some(PINNED_ALGORITHM) => {}
            Some(alg) => {
                tracing::warn!(target: "router.auth.jwt", alg = %alg, "Token algorithm rejected");
                return Err(AuthError::InvalidSignature.into());
            }
            None => {
                tracing::debug!(target: "router.auth.jwt", "Token header has no algorithm");
                return Err(AuthError::MalformedToken.into());
            }
        }

        let key = self.key_ring.lookup(&header.kid).await?;

        let token_data =
            decode::<RawClaims>(token, key.decoding_key(), &signature_only_validation()).map_err(
                |e| {
                    tracing::debug!(target: "router.auth.jwt", error = %e, "Token verification failed");
                    map_decode_error(e.kind())
                },
            )?;
        let raw = token_data.claims;

        let now = self.clock.now_unix();
        if now > raw.exp.saturating_add(self.leeway_seconds) {
            tracing::debug!(
                target: "router.auth.jwt",
                exp = raw.exp,
                now = now,
                "Token expired"
            );
            return Err(AuthError::ExpiredToken.into());
        }

        let pool_id = self.resolver.resolve(ISSUER_POOL_ID).await?;
        if raw.iss != issuer_for(&self.idp_base_url, &pool_id) {
            tracing::debug!(target: "router.auth.jwt", iss = %raw.iss, "Token issuer rejected");
            return Err(AuthError::InvalidIssuer.into());
        }

        let client_id = self.resolver.resolve(CLIENT_ID).await?;
        if !raw.aud.contains(&client_id) {
            tracing::debug!(target: "router.auth.jwt", "Token audience rejected");
            return Err(AuthError::InvalidAudience.into());
        }

        tracing::debug!(target: "router.auth.jwt", kid = %header.kid, "Token verified successfully");
        Ok(Claims::from_raw(raw))
    }
}

/// Validation that checks the RS256 signature only.
///
/// Time, issuer and audience checks run afterwards against the injected
/// clock and resolved parameters so each failure maps to its own error.
fn signature_only_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

fn map_decode_error(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::Base64(_)
        | ErrorKind::Crypto(_) => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        _ => AuthError::MalformedToken,
    }
}
