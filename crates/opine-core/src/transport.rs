//! Network transport seam between the SDK and its backend
//!
//! Two delivery paths exist: ordinary async JSON requests, and a "beacon"
//! path for page unload where the caller cannot await a response. Beacons
//! are strictly best-effort; failures are logged and swallowed.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Invalid API endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body and return the parsed JSON response
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError>;

    /// PATCH a JSON body and return the parsed JSON response
    async fn patch_json(&self, path: &str, body: &Value) -> Result<Value, TransportError>;

    /// Best-effort fire-and-forget delivery for the unload path.
    ///
    /// Returns true if the payload was handed off for delivery. No delivery
    /// guarantee is implied beyond that.
    fn send_beacon(&self, path: &str, body: Value) -> bool;
}

/// HTTP transport against the configured API endpoint
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        // Validate once up front so a bad embed config surfaces immediately
        Url::parse(endpoint)
            .map_err(|_| TransportError::InvalidEndpoint(endpoint.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Opine-SDK/0.1")
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        Ok(response.json().await.unwrap_or(Value::Null))
    }

    async fn patch_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let response = self.client.patch(self.url(path)).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        Ok(response.json().await.unwrap_or(Value::Null))
    }

    fn send_beacon(&self, path: &str, body: Value) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Beacon to {} dropped: no async runtime", path);
            return false;
        };

        let client = self.client.clone();
        let url = self.url(path);
        handle.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) => debug!("Beacon to {} returned {}", url, response.status()),
                Err(e) => warn!("Beacon to {} failed: {}", url, e),
            }
        });
        true
    }
}
