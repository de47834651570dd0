//! Negotiation session: dispatches incoming negotiation messages for one
//! channel and runs the setup exchange.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::message::{IceServer, SignalingMessage};
use super::perfect::{MediaConnection, PerfectNegotiation, SignalingSink};
use crate::core::{ChannelId, MessageHandler, NegotiationError};

/// Which end of the session this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The impolite side; requests setup.
    Client,
    /// The polite side; answers setup requests.
    Device,
}

/// Negotiation glue for one channel.
///
/// Install it as the channel's [`MessageHandler`] so negotiation messages
/// reach it in order.
pub struct NegotiationSession<M> {
    role: Role,
    negotiation: PerfectNegotiation<M>,
    sink: Arc<dyn SignalingSink>,
    ice_servers: Vec<IceServer>,
    remote_ice_servers: watch::Sender<Option<Vec<IceServer>>>,
}

impl<M> std::fmt::Debug for NegotiationSession<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("role", &self.role)
            .field("negotiation", &self.negotiation)
            .finish_non_exhaustive()
    }
}

impl<M: MediaConnection> NegotiationSession<M> {
    /// Client side session.
    pub fn client(media: Arc<M>, sink: Arc<dyn SignalingSink>) -> Self {
        Self {
            role: Role::Client,
            negotiation: PerfectNegotiation::impolite(media, sink.clone()),
            sink,
            ice_servers: Vec::new(),
            remote_ice_servers: watch::channel(None).0,
        }
    }

    /// Device side session answering setup with `ice_servers`.
    pub fn device(media: Arc<M>, sink: Arc<dyn SignalingSink>, ice_servers: Vec<IceServer>) -> Self {
        Self {
            role: Role::Device,
            negotiation: PerfectNegotiation::polite(media, sink.clone()),
            sink,
            ice_servers,
            remote_ice_servers: watch::channel(None).0,
        }
    }

    /// This end's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The underlying perfect negotiation.
    pub fn negotiation(&self) -> &PerfectNegotiation<M> {
        &self.negotiation
    }

    /// Ask the device for session setup.
    pub async fn request_setup(&self) -> Result<(), NegotiationError> {
        self.sink.send(SignalingMessage::SetupRequest).await
    }

    /// ICE servers received in the device's setup response.
    pub fn ice_servers(&self) -> watch::Receiver<Option<Vec<IceServer>>> {
        self.remote_ice_servers.subscribe()
    }

    /// Wait for the setup response and return its ICE servers.
    pub async fn wait_for_setup(&self) -> Result<Vec<IceServer>, NegotiationError> {
        let mut rx = self.ice_servers();
        let servers = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| NegotiationError::Signaling("session dropped".into()))?;
        Ok(servers.clone().unwrap_or_default())
    }

    /// Handle one application message from the remote peer.
    pub async fn handle(&self, message: Value) -> Result<(), NegotiationError> {
        let Some(message) = SignalingMessage::from_value(message)? else {
            debug!("ignoring unknown negotiation message");
            return Ok(());
        };

        match (self.role, message) {
            (Role::Device, SignalingMessage::SetupRequest) => {
                info!(servers = self.ice_servers.len(), "answering setup request");
                let response = SignalingMessage::SetupResponse {
                    ice_servers: Some(self.ice_servers.clone()),
                };
                self.sink.send(response).await
            }
            (Role::Client, SignalingMessage::SetupResponse { ice_servers }) => {
                let servers = ice_servers.unwrap_or_default();
                info!(servers = servers.len(), "setup response received");
                self.remote_ice_servers.send_replace(Some(servers));
                Ok(())
            }
            (_, SignalingMessage::Description { description }) => {
                self.negotiation.on_description(description).await
            }
            (_, SignalingMessage::Candidate { candidate }) => self.negotiation.on_candidate(candidate).await,
            (role, message) => {
                debug!(?role, kind = message.kind(), "ignoring message for the other role");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<M: MediaConnection> MessageHandler for NegotiationSession<M> {
    async fn on_message(&self, channel_id: &ChannelId, message: Value) {
        if let Err(e) = self.handle(message).await {
            warn!(channel = %channel_id, "negotiation message failed: {}", e);
        }
    }
}
