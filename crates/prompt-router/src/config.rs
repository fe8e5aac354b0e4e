//! Prompt Router configuration.
//!
//! Configuration is loaded from environment variables. Credentials embedded in
//! backend URLs are redacted in Debug output.

use common::jwt::{DEFAULT_EXP_LEEWAY, MAX_EXP_LEEWAY};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default deployment environment.
pub const DEFAULT_DEPLOY_ENV: &str = "dev";

/// Default first segment of every parameter path.
pub const DEFAULT_PARAMETER_PREFIX: &str = "prompt-router";

/// Default identity-provider base URL. The issuer is `{base}/{pool_id}`.
pub const DEFAULT_IDP_BASE_URL: &str = "https://cognito-idp.eu-central-1.amazonaws.com";

/// Default minimum interval between two key-set refreshes, in seconds.
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS: u64 = 30;

/// Default timeout for every outbound call, in seconds.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 5;

/// Default Redis stream for the `redis` queue backend.
pub const DEFAULT_QUEUE_STREAM: &str = "prompt-router:jobs";

/// Prefix of environment variables served by the `env` parameter backend.
pub const PARAM_ENV_PREFIX: &str = "PARAM_";

/// Where configuration parameters are read from.
#[derive(Clone, PartialEq, Eq)]
pub enum ParameterSource {
    /// Remote key/value store reached over HTTP.
    Http { base_url: String },

    /// Values captured from `PARAM_*` environment variables at startup.
    /// Keys are the upper-cased parameter names without the prefix.
    Env { values: HashMap<String, String> },
}

impl ParameterSource {
    /// Backend name as accepted by `PARAMETER_BACKEND`.
    pub fn name(&self) -> &'static str {
        match self {
            ParameterSource::Http { .. } => "http",
            ParameterSource::Env { .. } => "env",
        }
    }
}

impl fmt::Debug for ParameterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterSource::Http { base_url } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .finish(),
            ParameterSource::Env { values } => {
                let mut names: Vec<&String> = values.keys().collect();
                names.sort();
                f.debug_struct("Env").field("names", &names).finish()
            }
        }
    }
}

/// Where admitted requests are published.
#[derive(Clone, PartialEq, Eq)]
pub enum QueueTarget {
    /// SQS-compatible JSON endpoint.
    Http { endpoint: String, queue_url: String },

    /// Redis stream.
    Redis { url: String, stream: String },

    /// In-process queue (local runs and tests).
    Memory,
}

impl QueueTarget {
    /// Backend name as accepted by `QUEUE_BACKEND`.
    pub fn name(&self) -> &'static str {
        match self {
            QueueTarget::Http { .. } => "http",
            QueueTarget::Redis { .. } => "redis",
            QueueTarget::Memory => "memory",
        }
    }
}

impl fmt::Debug for QueueTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueTarget::Http {
                endpoint,
                queue_url,
            } => f
                .debug_struct("Http")
                .field("endpoint", endpoint)
                .field("queue_url", queue_url)
                .finish(),
            QueueTarget::Redis { stream, .. } => f
                .debug_struct("Redis")
                .field("url", &"[REDACTED]")
                .field("stream", stream)
                .finish(),
            QueueTarget::Memory => f.write_str("Memory"),
        }
    }
}

/// Prompt Router configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Deployment environment used to scope parameter paths (default: "dev").
    pub deploy_env: String,

    /// First segment of parameter paths (default: "prompt-router").
    pub parameter_prefix: String,

    /// Parameter store backend.
    pub parameter_source: ParameterSource,

    /// Identity-provider base URL; the issuer is `{idp_base_url}/{pool_id}`.
    pub idp_base_url: String,

    /// Local key-set file. When set, the network key source is never used.
    pub local_jwks_path: Option<PathBuf>,

    /// Minimum interval between two key-set refreshes.
    pub jwks_min_refresh_interval: Duration,

    /// Leeway in seconds applied to the `exp` check.
    pub jwt_clock_skew_seconds: i64,

    /// Queue backend.
    pub queue: QueueTarget,

    /// Timeout applied to every outbound call.
    pub upstream_timeout: Duration,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("deploy_env", &self.deploy_env)
            .field("parameter_prefix", &self.parameter_prefix)
            .field("parameter_source", &self.parameter_source)
            .field("idp_base_url", &self.idp_base_url)
            .field("local_jwks_path", &self.local_jwks_path)
            .field("jwks_min_refresh_interval", &self.jwks_min_refresh_interval)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("queue", &self.queue)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWKS refresh interval configuration: {0}")]
    InvalidRefreshInterval(String),

    #[error("Invalid upstream timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("Unknown backend '{value}' for {var}")]
    UnknownBackend { var: &'static str, value: String },

    #[error("LOCAL_JWKS_PATH must not be set when DEPLOY_ENV is '{0}'")]
    LocalJwksInProduction(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let deploy_env = vars
            .get("DEPLOY_ENV")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DEPLOY_ENV.to_string());

        let parameter_prefix = vars
            .get("PARAMETER_PREFIX")
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PARAMETER_PREFIX.to_string());

        let parameter_source = match vars.get("PARAMETER_BACKEND").map(String::as_str) {
            None | Some("env") => ParameterSource::Env {
                values: collect_param_vars(vars),
            },
            Some("http") => ParameterSource::Http {
                base_url: required(vars, "PARAMETER_STORE_URL")?
                    .trim_end_matches('/')
                    .to_string(),
            },
            Some(other) => {
                return Err(ConfigError::UnknownBackend {
                    var: "PARAMETER_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let idp_base_url = vars
            .get("IDP_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_IDP_BASE_URL.to_string());

        // A local key file bypasses the real identity provider, so it is only
        // accepted outside production.
        let local_jwks_path = vars
            .get("LOCAL_JWKS_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        if local_jwks_path.is_some() && is_production(&deploy_env) {
            return Err(ConfigError::LocalJwksInProduction(deploy_env));
        }

        let jwks_min_refresh_interval =
            if let Some(value_str) = vars.get("JWKS_MIN_REFRESH_INTERVAL_SECONDS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidRefreshInterval(format!(
                        "JWKS_MIN_REFRESH_INTERVAL_SECONDS must be a valid non-negative integer, got '{}': {}",
                        value_str, e
                    ))
                })?;
                Duration::from_secs(value)
            } else {
                Duration::from_secs(DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS)
            };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value < 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not be negative, got {}",
                    value
                )));
            }

            let max = i64::try_from(MAX_EXP_LEEWAY.as_secs()).unwrap_or(i64::MAX);
            if value > max {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    max, value
                )));
            }

            value
        } else {
            i64::try_from(DEFAULT_EXP_LEEWAY.as_secs()).unwrap_or(0)
        };

        let queue = match vars.get("QUEUE_BACKEND").map(String::as_str) {
            None | Some("http") => {
                let endpoint = required(vars, "QUEUE_ENDPOINT")?;
                let queue_url = vars
                    .get("QUEUE_URL")
                    .cloned()
                    .unwrap_or_else(|| endpoint.clone());
                QueueTarget::Http {
                    endpoint,
                    queue_url,
                }
            }
            Some("redis") => QueueTarget::Redis {
                url: required(vars, "REDIS_URL")?,
                stream: vars
                    .get("QUEUE_STREAM")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_QUEUE_STREAM.to_string()),
            },
            Some("memory") => QueueTarget::Memory,
            Some(other) => {
                return Err(ConfigError::UnknownBackend {
                    var: "QUEUE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let upstream_timeout = if let Some(value_str) = vars.get("UPSTREAM_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidTimeout(format!(
                    "UPSTREAM_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidTimeout(
                    "UPSTREAM_TIMEOUT_SECONDS must be greater than 0".to_string(),
                ));
            }

            Duration::from_secs(value)
        } else {
            Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECONDS)
        };

        Ok(Config {
            bind_address,
            deploy_env,
            parameter_prefix,
            parameter_source,
            idp_base_url,
            local_jwks_path,
            jwks_min_refresh_interval,
            jwt_clock_skew_seconds,
            queue,
            upstream_timeout,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn is_production(deploy_env: &str) -> bool {
    matches!(
        deploy_env.to_ascii_lowercase().as_str(),
        "prod" | "production"
    )
}

fn collect_param_vars(vars: &HashMap<String, String>) -> HashMap<String, String> {
    vars.iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(PARAM_ENV_PREFIX)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "QUEUE_ENDPOINT".to_string(),
            "http://localhost:9324".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.deploy_env, "dev");
        assert_eq!(config.parameter_prefix, "prompt-router");
        assert_eq!(config.parameter_source.name(), "env");
        assert_eq!(config.idp_base_url, DEFAULT_IDP_BASE_URL);
        assert!(config.local_jwks_path.is_none());
        assert_eq!(config.jwks_min_refresh_interval, Duration::from_secs(30));
        assert_eq!(config.jwt_clock_skew_seconds, 0);
        assert_eq!(
            config.queue,
            QueueTarget::Http {
                endpoint: "http://localhost:9324".to_string(),
                queue_url: "http://localhost:9324".to_string(),
            }
        );
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("DEPLOY_ENV".to_string(), "staging".to_string());
        vars.insert("PARAMETER_PREFIX".to_string(), "/tinyrouter/".to_string());
        vars.insert("PARAMETER_BACKEND".to_string(), "http".to_string());
        vars.insert(
            "PARAMETER_STORE_URL".to_string(),
            "http://params.internal/".to_string(),
        );
        vars.insert("IDP_BASE_URL".to_string(), "https://idp.example.com/".to_string());
        vars.insert("JWKS_MIN_REFRESH_INTERVAL_SECONDS".to_string(), "0".to_string());
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "120".to_string());
        vars.insert(
            "QUEUE_URL".to_string(),
            "https://sqs.example.com/123/prompts.fifo".to_string(),
        );
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "2".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.deploy_env, "staging");
        assert_eq!(config.parameter_prefix, "tinyrouter");
        assert_eq!(
            config.parameter_source,
            ParameterSource::Http {
                base_url: "http://params.internal".to_string()
            }
        );
        assert_eq!(config.idp_base_url, "https://idp.example.com");
        assert_eq!(config.jwks_min_refresh_interval, Duration::ZERO);
        assert_eq!(config.jwt_clock_skew_seconds, 120);
        assert_eq!(
            config.queue,
            QueueTarget::Http {
                endpoint: "http://localhost:9324".to_string(),
                queue_url: "https://sqs.example.com/123/prompts.fifo".to_string(),
            }
        );
        assert_eq!(config.upstream_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_env_parameter_backend_collects_param_vars() {
        let mut vars = base_vars();
        vars.insert("PARAM_CLIENT_ID".to_string(), "client-abc".to_string());
        vars.insert("PARAM_ISSUER_POOL_ID".to_string(), "pool-1".to_string());
        vars.insert("PARAM_".to_string(), "ignored".to_string());
        vars.insert("UNRELATED".to_string(), "x".to_string());

        let config = Config::from_vars(&vars).unwrap();

        let ParameterSource::Env { values } = config.parameter_source else {
            panic!("expected env parameter source");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(values.get("CLIENT_ID").unwrap(), "client-abc");
        assert_eq!(values.get("ISSUER_POOL_ID").unwrap(), "pool-1");
    }

    #[test]
    fn test_http_parameter_backend_requires_url() {
        let mut vars = base_vars();
        vars.insert("PARAMETER_BACKEND".to_string(), "http".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "PARAMETER_STORE_URL"));
    }

    #[test]
    fn test_unknown_parameter_backend_rejected() {
        let mut vars = base_vars();
        vars.insert("PARAMETER_BACKEND".to_string(), "vault".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::UnknownBackend { var: "PARAMETER_BACKEND", value }) if value == "vault"
        ));
    }

    #[test]
    fn test_http_queue_requires_endpoint() {
        let vars = HashMap::new();

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "QUEUE_ENDPOINT"));
    }

    #[test]
    fn test_redis_queue_backend() {
        let vars = HashMap::from([
            ("QUEUE_BACKEND".to_string(), "redis".to_string()),
            (
                "REDIS_URL".to_string(),
                "redis://:hunter2@localhost:6379".to_string(),
            ),
        ]);

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(
            config.queue,
            QueueTarget::Redis {
                url: "redis://:hunter2@localhost:6379".to_string(),
                stream: DEFAULT_QUEUE_STREAM.to_string(),
            }
        );
    }

    #[test]
    fn test_redis_queue_requires_url() {
        let vars = HashMap::from([("QUEUE_BACKEND".to_string(), "redis".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "REDIS_URL"));
    }

    #[test]
    fn test_memory_queue_backend_needs_nothing() {
        let vars = HashMap::from([("QUEUE_BACKEND".to_string(), "memory".to_string())]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.queue, QueueTarget::Memory);
    }

    #[test]
    fn test_unknown_queue_backend_rejected() {
        let vars = HashMap::from([("QUEUE_BACKEND".to_string(), "kafka".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::UnknownBackend { var: "QUEUE_BACKEND", .. })
        ));
    }

    #[test]
    fn test_local_jwks_allowed_in_dev() {
        let mut vars = base_vars();
        vars.insert("LOCAL_JWKS_PATH".to_string(), "/tmp/jwks.json".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.local_jwks_path, Some(PathBuf::from("/tmp/jwks.json")));
    }

    #[test]
    fn test_local_jwks_rejected_in_production() {
        for env_name in ["prod", "production", "PROD"] {
            let mut vars = base_vars();
            vars.insert("DEPLOY_ENV".to_string(), env_name.to_string());
            vars.insert("LOCAL_JWKS_PATH".to_string(), "/tmp/jwks.json".to_string());

            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::LocalJwksInProduction(_))),
                "LOCAL_JWKS_PATH should be rejected for DEPLOY_ENV={env_name}"
            );
        }
    }

    #[test]
    fn test_empty_local_jwks_path_is_ignored() {
        let mut vars = base_vars();
        vars.insert("DEPLOY_ENV".to_string(), "prod".to_string());
        vars.insert("LOCAL_JWKS_PATH".to_string(), String::new());

        let config = Config::from_vars(&vars).unwrap();
        assert!(config.local_jwks_path.is_none());
    }

    #[test]
    fn test_jwt_clock_skew_rejects_negative() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "-100".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must not be negative"))
        );
    }

    #[test]
    fn test_jwt_clock_skew_rejects_too_large() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must not exceed 600"))
        );
    }

    #[test]
    fn test_jwt_clock_skew_accepts_max() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "600".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.jwt_clock_skew_seconds, 600);
    }

    #[test]
    fn test_jwt_clock_skew_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert(
            "JWT_CLOCK_SKEW_SECONDS".to_string(),
            "five-minutes".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must be a valid integer"))
        );
    }

    #[test]
    fn test_refresh_interval_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert(
            "JWKS_MIN_REFRESH_INTERVAL_SECONDS".to_string(),
            "soon".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidRefreshInterval(_))));
    }

    #[test]
    fn test_upstream_timeout_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidTimeout(msg)) if msg.contains("must be greater than 0"))
        );
    }

    #[test]
    fn test_debug_redacts_redis_url() {
        let vars = HashMap::from([
            ("QUEUE_BACKEND".to_string(), "redis".to_string()),
            (
                "REDIS_URL".to_string(),
                "redis://:hunter2@localhost:6379".to_string(),
            ),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        let debug_output = format!("{:?}", config);

        assert!(
            !debug_output.contains("hunter2"),
            "Debug output should not contain the Redis password"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_debug_lists_param_names_not_values() {
        let mut vars = base_vars();
        vars.insert("PARAM_CLIENT_ID".to_string(), "client-abc".to_string());

        let config = Config::from_vars(&vars).unwrap();
        let debug_output = format!("{:?}", config);

        assert!(debug_output.contains("CLIENT_ID"));
        assert!(!debug_output.contains("client-abc"));
    }
}
