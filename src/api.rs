//! Portal REST client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::{EndpointConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::sync::{Fetcher, Resource, Versioned};

/// Response header carrying the server's monotonic state sequence
pub const SEQUENCE_HEADER: &str = "X-Sync-Sequence";

/// `{ success, data, message }` wrapper used by every portal endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// The payload of a successful envelope
    pub fn into_data(self) -> Result<T> {
        if !self.success {
            return Err(SyncError::Fetch(
                self.message
                    .unwrap_or_else(|| "Request rejected by server".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| SyncError::Fetch("Response contained no data".to_string()))
    }
}

/// Join a server base URL and an endpoint path
pub fn endpoint_url(base: &str, path: &str) -> Result<url::Url> {
    let base = base.trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    Ok(url::Url::parse(&format!("{}{}", base, path))?)
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    server_url: String,
    endpoints: EndpointConfig,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let server_url = config.require_server_url()?.to_string();
        // Fail early on a malformed base
        endpoint_url(&server_url, "/")?;

        Ok(Self {
            client: reqwest::Client::new(),
            server_url,
            endpoints: config.endpoints.clone(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<Versioned<T>> {
        let url = endpoint_url(&self.server_url, path)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::Fetch(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let sequence = response
            .headers()
            .get(SEQUENCE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Fetch(format!("Failed to read response: {}", e)))?;

        let envelope: ApiEnvelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(SyncError::Fetch(format!("Failed to parse response: {}", e)))
            }
            Err(_) => {
                return Err(SyncError::Fetch(format!(
                    "Request failed with status {}: {}",
                    status, body
                )))
            }
        };

        if !status.is_success() {
            return Err(SyncError::Fetch(format!(
                "Request failed with status {}: {}",
                status,
                envelope.message.unwrap_or_default()
            )));
        }

        Ok(Versioned {
            data: envelope.into_data()?,
            sequence,
        })
    }
}

#[async_trait]
impl<R: Resource> Fetcher<R> for ApiClient {
    async fn fetch(&self, token: &str) -> Result<Versioned<R::Data>> {
        self.get_json(R::endpoint(&self.endpoints), token).await
    }
}
