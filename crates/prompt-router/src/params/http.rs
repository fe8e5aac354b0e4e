//! Parameter backend for a remote HTTP key/value store.
//!
//! `GET {base_url}/parameters?name=<path>` answers
//! `{"Parameter":{"Name":"<path>","Value":"<value>"}}`; 404 means the
//! parameter does not exist.

use crate::errors::InfraError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GetParameterResponse {
    #[serde(rename = "Parameter")]
    parameter: StoredParameter,
}

#[derive(Debug, Deserialize)]
struct StoredParameter {
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug)]
pub struct HttpParameterStore {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpParameterStore {
    /// The client's timeout bounds every lookup.
    pub fn new(base_url: String, http_client: reqwest::Client) -> Self {
        Self {
            base_url,
            http_client,
        }
    }

    pub(super) async fn fetch(&self, name: &str, path: &str) -> Result<String, InfraError> {
        let unavailable = |reason: String| InfraError::ParameterUnavailable {
            name: name.to_string(),
            reason,
        };

        let url = reqwest::Url::parse_with_params(
            &format!("{}/parameters", self.base_url),
            &[("name", path)],
        )
        .map_err(|e| unavailable(format!("invalid store URL: {e}")))?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(unavailable("not found".to_string()));
        }
        if !status.is_success() {
            return Err(unavailable(format!("store returned {status}")));
        }

        let body: GetParameterResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid response: {e}")))?;

        Ok(body.parameter.value)
    }
}
