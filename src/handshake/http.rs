//! reqwest-backed handshake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::debug;

use super::{Handshake, HandshakeRequest, HandshakeResponse};
use crate::core::HandshakeError;

/// Handshake over HTTPS against one endpoint URL.
#[derive(Debug, Clone)]
pub struct HttpHandshake {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpHandshake {
    /// Handshake against `endpoint` with a 30 second request timeout.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, HandshakeError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(HandshakeError::BadRequest(format!(
                "handshake endpoint must be http(s), got {endpoint}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HandshakeError::Http(e.to_string()))?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl Handshake for HttpHandshake {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, HandshakeError> {
        debug!(endpoint = %self.endpoint, device = %request.device_id, "handshake");

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &request.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = builder
            .send()
            .await
            .map_err(|e| HandshakeError::Http(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<HandshakeResponse>()
                .await
                .map_err(|e| HandshakeError::InvalidResponse(e.to_string())),
            StatusCode::NOT_FOUND => Err(HandshakeError::NotFound),
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                Err(HandshakeError::BadRequest(body))
            }
            StatusCode::UNAUTHORIZED => Err(HandshakeError::Unauthorized),
            StatusCode::FORBIDDEN => Err(HandshakeError::Forbidden),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Err(HandshakeError::TooManyRequests { retry_after })
            }
            status => Err(HandshakeError::Http(format!("unexpected status {status}"))),
        }
    }
}
