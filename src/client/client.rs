//! High-level signaling client API.
//!
//! A client reaches one device through the relay: it runs the handshake
//! once, opens the relay socket, and talks to the device over a single
//! channel that survives reconnects.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::info;

use super::driver::{ClientCommand, ClientDriver};
use crate::channel::{ChannelHandle, ChannelTable};
use crate::connection::{ClientBackoff, ConnectionEvent, ConnectionSignals, ConnectionState};
use crate::core::{HandshakeError, MessageHandler, SignalingError, CLIENT_MAX_RECONNECT_ATTEMPTS};
use crate::handshake::{Handshake, HandshakeRequest, HandshakeResponse};
use crate::security::SigningConfig;
use crate::transport::{Connector, RoutingTransport};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Product of the device to reach.
    pub product_id: String,

    /// Device to reach.
    pub device_id: String,

    /// Optional bearer token for the handshake.
    pub token: Option<String>,

    /// Message signing for the channel.
    pub signing: SigningConfig,

    /// Reconnect attempts before the connection fails.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            product_id: String::new(),
            device_id: String::new(),
            token: None,
            signing: SigningConfig::None,
            max_reconnect_attempts: CLIENT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Builder for a [`ClientConfig`].
#[derive(Debug, Default)]
pub struct SignalingClientBuilder {
    config: ClientConfig,
}

impl SignalingClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device to reach.
    pub fn device(mut self, product_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.config.product_id = product_id.into();
        self.config.device_id = device_id.into();
        self
    }

    /// Set the handshake bearer token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Set message signing.
    pub fn signing(mut self, signing: SigningConfig) -> Self {
        self.config.signing = signing;
        self
    }

    /// Set the reconnect attempt budget.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// A connected signaling client.
///
/// Dropping the client closes the connection and its channel.
///
/// # Example
///
/// ```ignore
/// let config = SignalingClientBuilder::new()
///     .device("product", "device-1")
///     .signing(SigningConfig::shared_secret(secret))
///     .build();
///
/// let (client, channel) =
///     SignalingClient::connect(config, HttpHandshake::new(url)?, WebSocketConnector::new()).await?;
///
/// channel.set_message_handler(Some(Arc::new(tx)));
/// channel.send_message(json!({"type": "SETUP_REQUEST"})).await?;
/// ```
pub struct SignalingClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    signals: Arc<ConnectionSignals>,
    channel: ChannelHandle,
    response: HandshakeResponse,
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("state", &self.state())
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl SignalingClient {
    /// Handshake, open the relay socket and start the connection driver.
    ///
    /// Failures here are fatal; reconnects only happen after the first
    /// successful connect. Consuming the configuration makes a second
    /// handshake on the same client impossible.
    pub async fn connect(
        config: ClientConfig,
        handshake: impl Handshake,
        connector: impl Connector,
    ) -> Result<(Self, ChannelHandle), SignalingError> {
        Self::connect_with_handler(config, handshake, connector, None).await
    }

    /// Like [`connect`](Self::connect), with a message handler installed
    /// before the first message can arrive.
    pub async fn connect_with_handler(
        config: ClientConfig,
        handshake: impl Handshake,
        connector: impl Connector,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<(Self, ChannelHandle), SignalingError> {
        if config.product_id.is_empty() || config.device_id.is_empty() {
            return Err(SignalingError::Config("product_id and device_id are required".into()));
        }

        let signals = Arc::new(ConnectionSignals::new());
        signals.set(ConnectionState::Connecting);

        let mut request = HandshakeRequest::new(&config.product_id, &config.device_id);
        request.token = config.token.clone();

        let result = Self::open(&request, &handshake, connector).await;
        let (response, channel_id, transport) = match result {
            Ok(opened) => opened,
            Err(e) => {
                signals.set(ConnectionState::Failed);
                signals.error(e.clone());
                return Err(e);
            }
        };
        signals.set(ConnectionState::Connected);
        info!(channel = %channel_id, url = %response.signaling_url, "client connected");

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut channels = ChannelTable::new(channel_tx, config.signing);
        let channel = channels.open(channel_id, handler);

        let driver = ClientDriver {
            url: response.signaling_url.clone(),
            transport,
            channels,
            signals: signals.clone(),
            backoff: ClientBackoff::new(config.max_reconnect_attempts),
            channel_commands: channel_rx,
            commands: command_rx,
        };
        tokio::spawn(driver.run());

        let client = Self {
            commands: command_tx,
            signals,
            channel: channel.clone(),
            response,
        };
        Ok((client, channel))
    }

    async fn open(
        request: &HandshakeRequest,
        handshake: &impl Handshake,
        connector: impl Connector,
    ) -> Result<(HandshakeResponse, crate::core::ChannelId, RoutingTransport), SignalingError> {
        let response = handshake.handshake(request).await?;
        let channel_id = response.channel_id.clone().ok_or_else(|| {
            HandshakeError::InvalidResponse("handshake response has no channelId".into())
        })?;

        let mut transport = RoutingTransport::new(Arc::new(connector));
        transport.connect(&response.signaling_url).await?;
        Ok((response, channel_id, transport))
    }

    /// The client's channel.
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// Whether the device was online at handshake time, if reported.
    pub fn device_online(&self) -> Option<bool> {
        self.response.device_online
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.signals.state()
    }

    /// Watch the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.signals.watch()
    }

    /// Subscribe to connection events, including [`ConnectionEvent::Reconnected`].
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.signals.events().subscribe()
    }

    /// Close the channel and the connection. Idempotent.
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(ClientCommand::Close { done }).is_ok() {
            let _ = rx.await;
        }
        self.channel.set_message_handler(None);
    }
}
