//! Notarization over HTTP
//!
//! Request:
//!
//! ```text
//! POST <endpoint>
//! Authorization: Bearer <token>      (when configured)
//! {"id": "...", "hash": "<hex>", "hash_algorithm": "SHA-256"}
//! ```
//!
//! A 2xx response with `{"transaction_id": "..."}` is a success. Everything
//! else, including transport errors and unparsable bodies, is reported as
//! `VaultError::ExternalService`.

use super::NotarizationPort;
use crate::error::{VaultError, VaultResult};
use crate::stream::HashInfo;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Serialize)]
struct NotarizeRequest<'a> {
    id: &'a str,
    hash: &'a str,
    hash_algorithm: &'a str,
}

#[derive(Deserialize)]
struct NotarizeResponse {
    transaction_id: String,
}

/// Notarizer backed by a remote HTTP service
pub struct HttpNotarizer {
    client: Client,
    endpoint: Url,
    api_token: Option<String>,
}

impl HttpNotarizer {
    pub fn new(endpoint: &str, api_token: Option<String>, timeout: Duration) -> VaultResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| VaultError::ConfigError(format!("invalid notarization endpoint '{}': {}", endpoint, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl NotarizationPort for HttpNotarizer {
    async fn store(&self, id: &str, hash: &HashInfo) -> VaultResult<String> {
        debug!(target: "notary::http", id, endpoint = %self.endpoint, "submitting hash");

        let mut request = self.client.post(self.endpoint.clone()).json(&NotarizeRequest {
            id,
            hash: &hash.value,
            hash_algorithm: &hash.algorithm,
        });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VaultError::ExternalService(format!("notarization request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| VaultError::ExternalService(format!("notarization rejected: {}", e)))?;

        let body: NotarizeResponse = response.json().await.map_err(|e| {
            VaultError::ExternalService(format!("invalid notarization response: {}", e))
        })?;

        if body.transaction_id.trim().is_empty() {
            return Err(VaultError::ExternalService(
                "notarization response carried an empty transaction id".to_string(),
            ));
        }
        Ok(body.transaction_id)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
