//! HTTP handshake with the signaling service.
//!
//! Before opening a relay socket, a peer asks the signaling service where to
//! connect:
//!
//! ```text
//! POST {"productId": "...", "deviceId": "..."}    Authorization: Bearer <token>
//!   200 {"signalingUrl": "wss://...", "deviceOnline": true, "channelId": "..."}
//!   400 | 401 | 403 | 404 | 429 (Retry-After)
//! ```
//!
//! The token is optional for clients and mandatory for devices, which mint a
//! fresh identity token for every attempt.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use http::HttpHandshake;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{ChannelId, HandshakeError};

/// Handshake request body plus bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Product the device belongs to.
    pub product_id: String,
    /// Device to reach (client) or the calling device itself.
    pub device_id: String,
    /// Bearer token, sent as the `Authorization` header.
    #[serde(skip)]
    pub token: Option<String>,
}

impl HandshakeRequest {
    /// Request for `device_id` of `product_id`, without a token.
    pub fn new(product_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            device_id: device_id.into(),
            token: None,
        }
    }

    /// Attach a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Successful handshake response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Relay socket URL.
    pub signaling_url: String,
    /// Whether the device is currently connected to the relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_online: Option<bool>,
    /// Channel assigned to a client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
}

/// Performs the handshake.
#[async_trait]
pub trait Handshake: Send + Sync + 'static {
    /// Run one handshake.
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, HandshakeError>;
}

#[async_trait]
impl<H: Handshake + ?Sized> Handshake for Arc<H> {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, HandshakeError> {
        (**self).handshake(request).await
    }
}
