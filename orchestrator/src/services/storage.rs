//! HTTP client for the entity storage gateway

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use url::Url;

use crate::core::AssetAttributes;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::StorageClient;
use shared::logging::excerpt;
use shared::{component_debug, Component};

pub const ATTRIBUTES_HEADER: &str = "X-Entity-Attributes";

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntity {
    entity_key: String,
    #[serde(default)]
    tx_hash: Option<String>,
}

/// Uploads artifacts as expiring entities with typed attributes
pub struct HttpStorageClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    ttl: Duration,
}

impl HttpStorageClient {
    pub fn new(base_url: &str, token: Option<String>, ttl: Duration) -> OrchestratorResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| OrchestratorError::config(format!("invalid storage URL '{base_url}': {e}")))?;
        let endpoint = with_trailing_slash(base)
            .join("entities")
            .map_err(|e| OrchestratorError::config(format!("invalid storage URL '{base_url}': {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| OrchestratorError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            token: token.filter(|t| !t.trim().is_empty()),
            ttl,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn upload(
        &self,
        artifact: &[u8],
        content_type: &str,
        attributes: &AssetAttributes,
    ) -> OrchestratorResult<String> {
        attributes.validate()?;
        let encoded = attributes
            .to_json()
            .map_err(|e| OrchestratorError::upload(format!("cannot encode attributes: {e}")))?;

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .query(&[("expires_in", self.ttl.as_secs())])
            .header(CONTENT_TYPE, content_type)
            .header(ATTRIBUTES_HEADER, encoded)
            .body(artifact.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OrchestratorError::upload(format!("request to {} failed: {e}", self.endpoint)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::upload(format!(
                "gateway returned {status}: {}",
                excerpt(&body, 200)
            )));
        }

        let stored: StoredEntity = response
            .json()
            .await
            .map_err(|e| OrchestratorError::upload(format!("unexpected gateway response: {e}")))?;
        if stored.entity_key.trim().is_empty() {
            return Err(OrchestratorError::upload("gateway returned an empty entity key"));
        }

        component_debug!(
            Component::Storage,
            "🔗 Stored entity {} for id {} (tx {})",
            stored.entity_key,
            attributes.id,
            stored.tx_hash.as_deref().unwrap_or("-")
        );
        Ok(stored.entity_key)
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
