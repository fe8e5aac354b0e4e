//! Environment-scoped parameter resolution.
//!
//! Named values (issuer pool id, expected audience) live in a key/value store
//! under `/{prefix}/{env}/{name}`. The resolver memoizes every successful
//! lookup for the lifetime of the process; failures are never cached, so a
//! later request retries the store.

mod env;
mod http;

pub use env::EnvParameterStore;
pub use http::HttpParameterStore;

use crate::config::{Config, ParameterSource};
use crate::errors::InfraError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::instrument;

/// Parameter holding the identity-provider user pool id.
pub const ISSUER_POOL_ID: &str = "issuer_pool_id";

/// Parameter holding the expected token audience (client id).
pub const CLIENT_ID: &str = "client_id";

/// Store backends, selected once at startup by name.
#[derive(Debug)]
pub enum ParameterBackend {
    Http(HttpParameterStore),
    Env(EnvParameterStore),
}

impl ParameterBackend {
    /// Build the backend described by `source`.
    pub fn from_source(source: &ParameterSource, http_client: reqwest::Client) -> Self {
        match source {
            ParameterSource::Http { base_url } => {
                ParameterBackend::Http(HttpParameterStore::new(base_url.clone(), http_client))
            }
            ParameterSource::Env { values } => {
                ParameterBackend::Env(EnvParameterStore::new(values.clone()))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParameterBackend::Http(_) => "http",
            ParameterBackend::Env(_) => "env",
        }
    }

    async fn fetch(&self, name: &str, path: &str) -> Result<String, InfraError> {
        match self {
            ParameterBackend::Http(store) => store.fetch(name, path).await,
            ParameterBackend::Env(store) => store.fetch(name),
        }
    }
}

/// Memoizing resolver over a [`ParameterBackend`].
#[derive(Debug)]
pub struct ParameterResolver {
    backend: ParameterBackend,
    prefix: String,
    env: String,
    cache: RwLock<HashMap<String, String>>,
}

impl ParameterResolver {
    pub fn new(backend: ParameterBackend, prefix: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            env: env.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build the resolver described by the process configuration.
    pub fn from_config(config: &Config, http_client: reqwest::Client) -> Self {
        Self::new(
            ParameterBackend::from_source(&config.parameter_source, http_client),
            config.parameter_prefix.clone(),
            config.deploy_env.clone(),
        )
    }

    /// Fully qualified store path for `name`.
    pub fn path_for(&self, name: &str) -> String {
        format!("/{}/{}/{}", self.prefix, self.env, name)
    }

    /// Resolve `name`, consulting the store only on the first successful call.
    ///
    /// # Errors
    ///
    /// Returns `InfraError::ParameterUnavailable` if the store is unreachable
    /// or the name does not exist.
    #[instrument(skip_all, name = "router.params.resolve", fields(name = %name))]
    pub async fn resolve(&self, name: &str) -> Result<String, InfraError> {
        {
            let cache = self.cache.read().await;
            if let Some(value) = cache.get(name) {
                return Ok(value.clone());
            }
        }

        let path = self.path_for(name);
        tracing::debug!(
            target: "router.params",
            backend = self.backend.name(),
            path = %path,
            "Resolving parameter"
        );

        let value = self.backend.fetch(name, &path).await.map_err(|e| {
            tracing::warn!(target: "router.params", path = %path, error = %e, "Parameter lookup failed");
            e
        })?;

        // Two concurrent first lookups may both reach the store; the first
        // writer wins and both callers see the same value.
        let mut cache = self.cache.write().await;
        Ok(cache.entry(name.to_string()).or_insert(value).clone())
    }

    /// Number of memoized parameters.
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn env_resolver(values: &[(&str, &str)]) -> ParameterResolver {
        let values = values
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ParameterResolver::new(
            ParameterBackend::Env(EnvParameterStore::new(values)),
            "prompt-router",
            "dev",
        )
    }

    #[test]
    fn test_path_is_environment_scoped() {
        let resolver = env_resolver(&[]);
        assert_eq!(
            resolver.path_for(CLIENT_ID),
            "/prompt-router/dev/client_id"
        );
    }

    #[tokio::test]
    async fn test_resolve_env_value() {
        let resolver = env_resolver(&[("CLIENT_ID", "client-abc")]);

        assert_eq!(resolver.resolve(CLIENT_ID).await.unwrap(), "client-abc");
        assert_eq!(resolver.cached_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_missing_value_is_not_cached() {
        let resolver = env_resolver(&[]);

        let err = resolver.resolve(ISSUER_POOL_ID).await.unwrap_err();
        assert!(matches!(
            err,
            InfraError::ParameterUnavailable { ref name, .. } if name == ISSUER_POOL_ID
        ));
        assert_eq!(resolver.cached_count().await, 0);
    }

    #[test]
    fn test_backend_from_source() {
        let http = reqwest::Client::new();

        let backend = ParameterBackend::from_source(
            &ParameterSource::Http {
                base_url: "http://params".to_string(),
            },
            http.clone(),
        );
        assert_eq!(backend.name(), "http");

        let backend = ParameterBackend::from_source(
            &ParameterSource::Env {
                values: HashMap::new(),
            },
            http,
        );
        assert_eq!(backend.name(), "env");
    }
}
