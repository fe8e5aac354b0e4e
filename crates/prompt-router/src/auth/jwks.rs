//! Signing-key ring backed by a JSON Web Key Set.
//!
//! The [`KeyRing`] caches the identity provider's key set and refreshes it
//! only when a token names a key id it does not know. The set is replaced
//! wholesale on refresh, so readers never observe a partial set.
//!
//! # Security
//!
//! - Only RSA signing keys usable with RS256 enter the set
//! - Refreshes are single-flight and rate limited, so a stream of tokens with
//!   random key ids cannot turn into a stream of key-set fetches
//! - A failed refresh keeps the previous set in place

use crate::auth::issuer_for;
use crate::clock::Clock;
use crate::errors::{AuthError, InfraError, RouterError};
use crate::observability::metrics;
use crate::params::{ParameterResolver, ISSUER_POOL_ID};
use common::jwt::PINNED_ALGORITHM;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// JSON Web Key as published in the key set.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (must be "RSA").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Declared algorithm (must be "RS256" when present).
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (must be "sig" when present).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Algorithms a [`SigningKey`] can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rs256,
}

/// Public verification key for one key id. Immutable once built.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    algorithm: KeyAlgorithm,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// Build a verification key from a JWK, or explain why it is unusable.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, String> {
        if jwk.kty != "RSA" {
            return Err(format!("unsupported key type '{}'", jwk.kty));
        }
        if let Some(alg) = jwk.alg.as_deref() {
            if alg != PINNED_ALGORITHM {
                return Err(format!("unsupported algorithm '{alg}'"));
            }
        }
        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(format!("unsupported key use '{key_use}'"));
            }
        }
        if jwk.kid.is_empty() {
            return Err("empty key id".to_string());
        }

        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            return Err("missing RSA components".to_string());
        };
        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| format!("invalid RSA components: {err}"))?;

        Ok(Self {
            key_id: jwk.kid.clone(),
            algorithm: KeyAlgorithm::Rs256,
            decoding_key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Signing keys by key id, with the time they were fetched.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: i64,
}

impl KeySet {
    /// Parse a `{"keys":[...]}` document.
    ///
    /// Entries that are not usable RS256 signing keys are skipped with a
    /// warning. A later duplicate key id replaces the earlier one.
    pub fn from_document(document: &[u8], fetched_at: i64) -> Result<Self, String> {
        let document: JwksDocument =
            serde_json::from_slice(document).map_err(|e| format!("unparsable key set: {e}"))?;

        let mut keys = HashMap::with_capacity(document.keys.len());
        for entry in document.keys {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::warn!(target: "router.auth.jwks", error = %e, "Skipping unparsable key");
                    continue;
                }
            };
            match SigningKey::from_jwk(&jwk) {
                Ok(key) => {
                    keys.insert(key.key_id.clone(), Arc::new(key));
                }
                Err(reason) => {
                    tracing::warn!(
                        target: "router.auth.jwks",
                        kid = %jwk.kid,
                        reason = %reason,
                        "Skipping unusable key"
                    );
                }
            }
        }

        Ok(Self { keys, fetched_at })
    }

    pub fn get(&self, key_id: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(key_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> i64 {
        self.fetched_at
    }
}

/// Where the key set is loaded from.
pub enum KeySource {
    /// Local override file, re-read on every refresh. Never touches the network.
    LocalFile(PathBuf),

    /// `{issuer}/.well-known/jwks.json`, with the issuer built from the
    /// identity-provider base URL and the resolved `issuer_pool_id`.
    Remote {
        resolver: Arc<ParameterResolver>,
        idp_base_url: String,
        http_client: reqwest::Client,
    },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::LocalFile(path) => f.debug_tuple("LocalFile").field(path).finish(),
            KeySource::Remote { idp_base_url, .. } => f
                .debug_struct("Remote")
                .field("idp_base_url", idp_base_url)
                .finish_non_exhaustive(),
        }
    }
}

impl KeySource {
    async fn load(&self) -> Result<Vec<u8>, RouterError> {
        match self {
            KeySource::LocalFile(path) => tokio::fs::read(path).await.map_err(|e| {
                tracing::error!(
                    target: "router.auth.jwks",
                    path = %path.display(),
                    error = %e,
                    "Failed to read local key set"
                );
                InfraError::KeySourceUnavailable(format!("cannot read {}: {e}", path.display()))
                    .into()
            }),
            KeySource::Remote {
                resolver,
                idp_base_url,
                http_client,
            } => {
                let pool_id = resolver.resolve(ISSUER_POOL_ID).await?;
                let url = format!(
                    "{}/.well-known/jwks.json",
                    issuer_for(idp_base_url, &pool_id)
                );
                tracing::debug!(target: "router.auth.jwks", url = %url, "Fetching key set");

                let response = http_client.get(&url).send().await.map_err(|e| {
                    tracing::error!(target: "router.auth.jwks", error = %e, "Failed to fetch key set");
                    InfraError::KeySourceUnavailable(format!("request failed: {e}"))
                })?;

                if !response.status().is_success() {
                    tracing::error!(
                        target: "router.auth.jwks",
                        status = %response.status(),
                        "Key set endpoint returned error"
                    );
                    return Err(InfraError::KeySourceUnavailable(format!(
                        "endpoint returned {}",
                        response.status()
                    ))
                    .into());
                }

                let body = response.bytes().await.map_err(|e| {
                    tracing::error!(target: "router.auth.jwks", error = %e, "Failed to read key set body");
                    InfraError::KeySourceUnavailable(format!("body read failed: {e}"))
                })?;

                Ok(body.to_vec())
            }
        }
    }
}

/// Cached signing keys with refresh-on-miss.
pub struct KeyRing {
    source: KeySource,
    clock: Arc<dyn Clock>,
    cache: RwLock<Arc<KeySet>>,
    /// Single-flight refresh lock; holds the time of the last successful refresh.
    refresh_lock: Mutex<Option<i64>>,
    min_refresh_interval: Duration,
    refresh_count: AtomicU64,
}

impl KeyRing {
    /// Create an empty key ring. Nothing is fetched until the first
    /// [`refresh`](Self::refresh) or cache miss.
    pub fn new(source: KeySource, clock: Arc<dyn Clock>, min_refresh_interval: Duration) -> Self {
        Self {
            source,
            clock,
            cache: RwLock::new(Arc::new(KeySet::default())),
            refresh_lock: Mutex::new(None),
            min_refresh_interval,
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Get the signing key for `key_id`.
    ///
    /// A cache hit performs no I/O. On a miss the whole key set is refreshed
    /// at most once and the lookup retried. A miss within the minimum refresh
    /// interval of the previous refresh fails without fetching.
    ///
    /// # Errors
    ///
    /// - `AuthError::UnknownKey` - key id absent after refresh (or debounced)
    /// - `InfraError::KeySourceUnavailable` / `ParameterUnavailable` - the
    ///   refresh itself failed
    #[instrument(skip_all, name = "router.auth.jwks.lookup", fields(kid = %key_id))]
    pub async fn lookup(&self, key_id: &str) -> Result<Arc<SigningKey>, RouterError> {
        if let Some(key) = self.cached(key_id).await {
            tracing::debug!(target: "router.auth.jwks", kid = %key_id, "Key set cache hit");
            return Ok(key);
        }

        let mut last_refresh = self.refresh_lock.lock().await;

        // A concurrent miss may have refreshed while we waited for the lock.
        if let Some(key) = self.cached(key_id).await {
            return Ok(key);
        }

        if let Some(at) = *last_refresh {
            let elapsed = self.clock.now_unix().saturating_sub(at);
            let interval = i64::try_from(self.min_refresh_interval.as_secs()).unwrap_or(i64::MAX);
            if elapsed < interval {
                tracing::debug!(
                    target: "router.auth.jwks",
                    kid = %key_id,
                    seconds_since_refresh = elapsed,
                    "Unknown key within refresh interval, not refetching"
                );
                return Err(AuthError::UnknownKey.into());
            }
        }

        self.refresh_locked(&mut last_refresh).await?;
        drop(last_refresh);

        match self.cached(key_id).await {
            Some(key) => Ok(key),
            None => {
                tracing::warn!(target: "router.auth.jwks", kid = %key_id, "Key not found in key set after refresh");
                Err(AuthError::UnknownKey.into())
            }
        }
    }

    /// Unconditionally reload the key set from its source.
    ///
    /// Returns the number of usable keys loaded. On failure the previous set
    /// stays in place.
    #[instrument(skip_all, name = "router.auth.jwks.refresh")]
    pub async fn refresh(&self) -> Result<usize, RouterError> {
        let mut last_refresh = self.refresh_lock.lock().await;
        self.refresh_locked(&mut last_refresh).await
    }

    /// Number of keys currently cached.
    pub async fn key_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Number of refresh attempts made so far (successful or not).
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    async fn cached(&self, key_id: &str) -> Option<Arc<SigningKey>> {
        self.cache.read().await.get(key_id)
    }

    async fn refresh_locked(&self, last_refresh: &mut Option<i64>) -> Result<usize, RouterError> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);

        let result = self.fetch_key_set().await;
        metrics::record_jwks_refresh(if result.is_ok() { "success" } else { "error" });

        let key_set = result?;
        let count = key_set.len();
        *self.cache.write().await = Arc::new(key_set);
        *last_refresh = Some(self.clock.now_unix());

        tracing::info!(target: "router.auth.jwks", key_count = count, "Key set refreshed");
        Ok(count)
    }

    async fn fetch_key_set(&self) -> Result<KeySet, RouterError> {
        let document = self.source.load().await?;
        KeySet::from_document(&document, self.clock.now_unix()).map_err(|e| {
            tracing::error!(target: "router.auth.jwks", error = %e, "Failed to parse key set");
            InfraError::KeySourceUnavailable(e).into()
        })
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("source", &self.source)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("refresh_count", &self.refresh_count())
            .finish_non_exhaustive()
    }
}
