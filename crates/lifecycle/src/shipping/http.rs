//! HTTP client for the carrier's shipment endpoint.

use std::time::Duration;

use async_trait::async_trait;
use domain::ShipmentReceipt;
use reqwest::Client;
use serde::Deserialize;

use super::endpoint::{EndpointError, ShipmentEndpoint, ShipmentRequest};

/// Client-side timeout applied to every request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts shipment requests as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct HttpShipmentEndpoint {
    url: String,
    http: Client,
}

impl HttpShipmentEndpoint {
    /// # Errors
    ///
    /// Returns an error when the TLS backend cannot be initialized.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "detail")]
    error: String,
}

#[async_trait]
impl ShipmentEndpoint for HttpShipmentEndpoint {
    async fn schedule(&self, request: &ShipmentRequest) -> Result<ShipmentReceipt, EndpointError> {
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    EndpointError::Timeout
                } else {
                    EndpointError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // Prefer the carrier's own message when the body is structured.
            let body = serde_json::from_str::<ErrorBody>(&text)
                .map(|parsed| parsed.error)
                .unwrap_or(text);
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ShipmentReceipt>()
            .await
            .map_err(|err| EndpointError::InvalidResponse(err.to_string()))
    }
}
