//! # Edge Signaling
//!
//! Reliable, signed peer-to-peer signaling through a relay, for bootstrapping
//! WebRTC connections between clients and edge devices.
//!
//! A client and a device never talk directly. Both hold a WebSocket to a
//! relay that multiplexes logical *channels* between them. On top of the
//! relay this crate provides:
//!
//! - **Reliability**: exactly-once, in-order delivery with acks and resend
//!   across relay reconnects and peer absence
//! - **Security**: optional HS256 message signing with nonce locking, and
//!   Ed25519 identity tokens for devices
//! - **Recovery**: client and device reconnect policies, liveness probes
//! - **Negotiation**: perfect negotiation and connectivity glue for a WebRTC
//!   media connection
//!
//! ## Layers
//!
//! ```text
//!   application / negotiation     SignalingMessage, PerfectNegotiation
//!   channel                       ChannelHandle, ChannelState
//!   security                      SecurityFrame { NONE | JWT }
//!   reliability                   ReliabilityFrame { DATA | ACK }
//!   routing transport             RoutingFrame { MESSAGE | ERROR | PEER_* | PING | PONG }
//!   socket                        Connector (WebSocket)
//! ```
//!
//! ## Feature Flags
//!
//! - `websocket` (default): WebSocket connector (tokio-tungstenite)
//! - `http` (default): HTTP handshake client (reqwest)
//!
//! ## Example Usage
//!
//! ```ignore
//! use edge_signaling::prelude::*;
//!
//! let config = SignalingClientBuilder::new()
//!     .device("product", "device-1")
//!     .build();
//! let handshake = HttpHandshake::new("https://signaling.example.com/v1/client/connect")?;
//! let (client, channel) =
//!     SignalingClient::connect(config, handshake, WebSocketConnector::new()).await?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<serde_json::Value>();
//! channel.set_message_handler(Some(Arc::new(tx)));
//! channel.send_message(SignalingMessage::SetupRequest.to_value()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod transport;

pub mod reliability;

pub mod security;

pub mod channel;

pub mod connection;

pub mod handshake;

pub mod client;

pub mod device;

pub mod negotiation;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{ChannelId, ErrorCode, MessageHandler, ProtocolError, SignalingError};

    pub use crate::channel::{ChannelEvent, ChannelHandle, ChannelState};
    pub use crate::client::{ClientConfig, SignalingClient, SignalingClientBuilder};
    pub use crate::connection::{ConnectionEvent, ConnectionState};
    pub use crate::device::{DeviceConfig, SignalingDevice, SignalingDeviceBuilder};
    pub use crate::handshake::{Handshake, HandshakeRequest, HandshakeResponse};
    pub use crate::negotiation::*;
    pub use crate::security::{DeviceKey, SigningConfig};
    pub use crate::transport::Connector;

    #[cfg(feature = "http")]
    pub use crate::handshake::HttpHandshake;

    #[cfg(feature = "websocket")]
    pub use crate::transport::WebSocketConnector;

    pub use std::sync::Arc;
}

// Re-export commonly used items at crate root
pub use crate::core::{ChannelId, ErrorCode, MessageHandler, ProtocolError, SignalingError};

pub use channel::{ChannelHandle, ChannelState};
pub use client::{SignalingClient, SignalingClientBuilder};
pub use connection::{ConnectionEvent, ConnectionState};
pub use device::{SignalingDevice, SignalingDeviceBuilder};
pub use security::SigningConfig;
