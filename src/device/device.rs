//! High-level signaling device API.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::driver::{DeviceCommand, DeviceDriver};
use crate::channel::{ChannelHandle, ChannelTable};
use crate::connection::{ConnectionEvent, ConnectionSignals, ConnectionState, DeviceBackoff};
use crate::core::{MessageHandler, SignalingError, DEFAULT_MAX_CHANNELS};
use crate::handshake::{Handshake, HandshakeRequest};
use crate::security::{DeviceKey, DeviceTokenMinter, SigningConfig};
use crate::transport::{Connector, RoutingTransport};

/// Device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Product this device belongs to.
    pub product_id: String,

    /// This device's id.
    pub device_id: String,

    /// Identity key for handshake tokens (generated if not provided).
    pub identity: Option<DeviceKey>,

    /// Message signing for every channel.
    pub signing: SigningConfig,

    /// Maximum concurrent channels.
    pub max_channels: usize,

    /// Reject messages the relay did not mark as authorized.
    pub require_authorized: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            product_id: String::new(),
            device_id: String::new(),
            identity: None,
            signing: SigningConfig::None,
            max_channels: DEFAULT_MAX_CHANNELS,
            require_authorized: false,
        }
    }
}

/// Builder for a [`DeviceConfig`].
#[derive(Debug, Default)]
pub struct SignalingDeviceBuilder {
    config: DeviceConfig,
}

impl SignalingDeviceBuilder {
    /// Create a new device builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device identity.
    pub fn device(mut self, product_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.config.product_id = product_id.into();
        self.config.device_id = device_id.into();
        self
    }

    /// Set the identity key.
    pub fn identity(mut self, key: DeviceKey) -> Self {
        self.config.identity = Some(key);
        self
    }

    /// Set message signing.
    pub fn signing(mut self, signing: SigningConfig) -> Self {
        self.config.signing = signing;
        self
    }

    /// Set the channel limit.
    pub fn max_channels(mut self, max: usize) -> Self {
        self.config.max_channels = max;
        self
    }

    /// Require relay authorization on every message.
    pub fn require_authorized(mut self, required: bool) -> Self {
        self.config.require_authorized = required;
        self
    }

    /// Build the device configuration.
    pub fn build(self) -> DeviceConfig {
        self.config
    }
}

/// A running signaling device.
///
/// The device connects in the background and reconnects forever. Channels
/// opened by clients arrive on the receiver returned by
/// [`start`](Self::start). Dropping the device closes it.
pub struct SignalingDevice {
    commands: mpsc::UnboundedSender<DeviceCommand>,
    signals: Arc<ConnectionSignals>,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for SignalingDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingDevice")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SignalingDevice {
    /// Start the device.
    ///
    /// `handler` is installed on every new channel before its first message
    /// is delivered; replace it per channel with
    /// [`ChannelHandle::set_message_handler`].
    pub fn start(
        config: DeviceConfig,
        handshake: impl Handshake,
        connector: impl Connector,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelHandle>), SignalingError> {
        if config.product_id.is_empty() || config.device_id.is_empty() {
            return Err(SignalingError::Config("product_id and device_id are required".into()));
        }
        if config.max_channels == 0 {
            return Err(SignalingError::Config("max_channels must be at least 1".into()));
        }

        let key = config.identity.unwrap_or_else(DeviceKey::generate);
        let verifying_key = key.verifying_key();
        let minter = DeviceTokenMinter::new(key, &config.product_id, &config.device_id);

        let signals = Arc::new(ConnectionSignals::new());
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (new_channels, incoming) = mpsc::unbounded_channel();

        let driver = DeviceDriver {
            request: HandshakeRequest::new(config.product_id, config.device_id),
            minter,
            handshake: Arc::new(handshake),
            transport: RoutingTransport::new(Arc::new(connector)),
            channels: ChannelTable::new(channel_tx, config.signing),
            signals: signals.clone(),
            backoff: DeviceBackoff::new(),
            handler,
            new_channels,
            max_channels: config.max_channels,
            require_authorized: config.require_authorized,
            channel_commands: channel_rx,
            commands: command_rx,
        };
        tokio::spawn(driver.run());

        let device = Self {
            commands: command_tx,
            signals,
            verifying_key,
        };
        Ok((device, incoming))
    }

    /// Public half of the identity key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.signals.state()
    }

    /// Watch the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.signals.watch()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.signals.events().subscribe()
    }

    /// Probe the relay; a missing pong within `timeout` forces a reconnect.
    pub fn check_alive(&self, timeout: Duration) {
        let _ = self.commands.send(DeviceCommand::CheckAlive { timeout });
    }

    /// Close every channel and the connection. Idempotent.
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(DeviceCommand::Close { done }).is_ok() {
            let _ = rx.await;
        }
    }
}
