//! Parameter backend served from `PARAM_*` environment variables.

use crate::errors::InfraError;
use std::collections::HashMap;

/// Static parameter values captured at startup.
///
/// `client_id` is served from `PARAM_CLIENT_ID`, and so on.
pub struct EnvParameterStore {
    values: HashMap<String, String>,
}

impl EnvParameterStore {
    /// `values` is keyed by upper-cased parameter name.
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub(super) fn fetch(&self, name: &str) -> Result<String, InfraError> {
        self.values
            .get(&name.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| InfraError::ParameterUnavailable {
                name: name.to_string(),
                reason: "not set".to_string(),
            })
    }
}

impl std::fmt::Debug for EnvParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvParameterStore")
            .field("count", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive_on_name() {
        let store = EnvParameterStore::new(HashMap::from([(
            "ISSUER_POOL_ID".to_string(),
            "pool-1".to_string(),
        )]));

        assert_eq!(store.fetch("issuer_pool_id").unwrap(), "pool-1");
    }

    #[test]
    fn test_debug_hides_values() {
        let store = EnvParameterStore::new(HashMap::from([(
            "CLIENT_ID".to_string(),
            "client-abc".to_string(),
        )]));

        assert!(!format!("{store:?}").contains("client-abc"));
    }
}
