//! Device connection driver.
//!
//! One task per device owns the transport and every channel clients open
//! to it. Unlike the client, the device re-runs the handshake with a fresh
//! identity token on every attempt and never gives up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelCommand, ChannelHandle, ChannelTable};
use crate::connection::{parse_retry_after, ConnectionSignals, ConnectionState, DeviceBackoff};
use crate::core::{
    ChannelId, ErrorCode, HandshakeError, MessageHandler, ProtocolError,
    DEVICE_BACKOFF_RESET_AFTER,
};
use crate::handshake::{Handshake, HandshakeRequest};
use crate::reliability::ReliabilityFrame;
use crate::security::DeviceTokenMinter;
use crate::transport::{sleep_until_opt, RoutingFrame, RoutingTransport, TransportEvent};

#[derive(Debug)]
pub(crate) enum DeviceCommand {
    Close { done: oneshot::Sender<()> },
    CheckAlive { timeout: Duration },
}

pub(crate) struct DeviceDriver {
    pub(crate) request: HandshakeRequest,
    pub(crate) minter: DeviceTokenMinter,
    pub(crate) handshake: Arc<dyn Handshake>,
    pub(crate) transport: RoutingTransport,
    pub(crate) channels: ChannelTable,
    pub(crate) signals: Arc<ConnectionSignals>,
    pub(crate) backoff: DeviceBackoff,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) new_channels: mpsc::UnboundedSender<ChannelHandle>,
    pub(crate) max_channels: usize,
    pub(crate) require_authorized: bool,
    pub(crate) channel_commands: mpsc::UnboundedReceiver<ChannelCommand>,
    pub(crate) commands: mpsc::UnboundedReceiver<DeviceCommand>,
}

impl DeviceDriver {
    pub(crate) async fn run(mut self) {
        let mut has_connected = false;
        let mut retry_at = Some(Instant::now());
        let mut reset_at: Option<Instant> = None;

        loop {
            tokio::select! {
                event = self.transport.next_event() => {
                    if let Some(delay) = self.on_transport_event(event) {
                        reset_at = None;
                        retry_at = Some(Instant::now() + delay);
                    }
                }
                Some(command) = self.channel_commands.recv() => {
                    self.on_channel_command(command);
                }
                command = self.commands.recv() => match command {
                    Some(DeviceCommand::CheckAlive { timeout }) => {
                        self.transport.check_alive(timeout);
                    }
                    Some(DeviceCommand::Close { done }) => {
                        self.close();
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.close();
                        return;
                    }
                },
                _ = sleep_until_opt(retry_at) => {
                    retry_at = None;
                    match self.attempt(has_connected).await {
                        Ok(()) => {
                            has_connected = true;
                            reset_at = Some(Instant::now() + DEVICE_BACKOFF_RESET_AFTER);
                        }
                        Err(delay) => retry_at = Some(Instant::now() + delay),
                    }
                }
                _ = sleep_until_opt(reset_at) => {
                    reset_at = None;
                    debug!("connection stable, resetting backoff");
                    self.backoff.reset();
                }
            }
        }
    }

    /// One handshake-and-connect attempt. On failure returns the delay
    /// before the next one.
    async fn attempt(&mut self, has_connected: bool) -> Result<(), Duration> {
        self.signals.set(ConnectionState::Connecting);

        let token = match self.minter.mint() {
            Ok(token) => token,
            Err(e) => {
                warn!("could not mint identity token: {}", e);
                return Err(self.backoff_delay());
            }
        };
        let request = self.request.clone().with_token(token);

        let response = match self.handshake.handshake(&request).await {
            Ok(response) => response,
            Err(HandshakeError::TooManyRequests { retry_after }) => {
                let delay = parse_retry_after(retry_after.as_deref(), Utc::now());
                warn!(?delay, "handshake rate limited");
                self.signals.set(ConnectionState::WaitRetry);
                return Err(delay);
            }
            Err(e) => {
                warn!("handshake failed: {}", e);
                return Err(self.backoff_delay());
            }
        };

        if let Err(e) = self.transport.connect(&response.signaling_url).await {
            warn!("relay connect failed: {}", e);
            return Err(self.backoff_delay());
        }

        self.signals.set(ConnectionState::Connected);
        if has_connected {
            info!("device reconnected");
            self.signals.reconnected();
            self.channels
                .for_each(&self.transport, Channel::on_transport_reconnected);
        } else {
            info!(url = %response.signaling_url, "device connected");
        }
        Ok(())
    }

    fn backoff_delay(&mut self) -> Duration {
        self.signals.set(ConnectionState::WaitRetry);
        let delay = self.backoff.next_delay();
        info!(attempt = self.backoff.counter(), ?delay, "reconnecting");
        delay
    }

    /// Returns the reconnect delay if the socket was lost.
    fn on_transport_event(&mut self, event: TransportEvent) -> Option<Duration> {
        match event {
            TransportEvent::Frame(frame) => {
                self.on_frame(frame);
                None
            }
            TransportEvent::Lost { error, .. } => {
                info!("relay socket lost: {}", error);
                Some(self.backoff_delay())
            }
            TransportEvent::LivenessFailed => {
                warn!("relay did not answer ping, aborting socket");
                let event = self.transport.force_abort();
                self.on_transport_event(event)
            }
        }
    }

    fn on_frame(&mut self, frame: RoutingFrame) {
        if let RoutingFrame::Message {
            channel_id,
            authorized,
            ..
        } = &frame
        {
            if self.require_authorized && *authorized != Some(true) {
                warn!(channel = %channel_id, "rejecting message from unauthorized client");
                self.send_error(channel_id, ErrorCode::AccessDenied);
                return;
            }
        }

        match self.channels.route(frame, &self.transport) {
            Some(RoutingFrame::Message {
                channel_id,
                message,
                ..
            }) => self.on_unknown_channel(channel_id, message),
            Some(frame) => debug!(?frame, "dropping frame for unknown channel"),
            None => {}
        }
    }

    /// A message for a channel we do not have. Only `DATA` with seq 0 opens
    /// a new channel.
    fn on_unknown_channel(&mut self, channel_id: ChannelId, message: Value) {
        match ReliabilityFrame::from_value(message.clone()) {
            Ok(Some(ReliabilityFrame::Data { seq: 0, .. })) => {
                if self.channels.len() >= self.max_channels {
                    warn!(channel = %channel_id, max = self.max_channels, "channel limit reached");
                    self.send_error(&channel_id, ErrorCode::NoMoreChannels);
                    return;
                }
                info!(channel = %channel_id, "client opened channel");
                let handle = self.channels.open(channel_id.clone(), Some(self.handler.clone()));
                let _ = self.new_channels.send(handle);
                self.channels
                    .with(&channel_id, &self.transport, Channel::on_peer_connected);
                self.channels
                    .with(&channel_id, &self.transport, |ch| ch.on_message(message));
            }
            Ok(Some(ReliabilityFrame::Data { seq, .. })) => {
                debug!(channel = %channel_id, seq, "data for unknown channel");
                self.send_error(&channel_id, ErrorCode::ChannelNotFound);
            }
            Ok(Some(ReliabilityFrame::Ack { seq })) => {
                debug!(channel = %channel_id, seq, "dropping stray ack");
            }
            Ok(None) | Err(_) => {
                warn!(channel = %channel_id, "dropping undecodable frame for unknown channel");
            }
        }
    }

    fn on_channel_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::CheckAlive { timeout } => {
                self.transport.check_alive(timeout);
            }
            command => self.channels.handle_command(command, &self.transport),
        }
    }

    fn send_error(&self, channel_id: &ChannelId, code: ErrorCode) {
        if let Err(e) = self.transport.send_error(channel_id, ProtocolError::new(code)) {
            debug!(channel = %channel_id, "error frame not sent: {}", e);
        }
    }

    fn close(&mut self) {
        self.channels.close_all(&self.transport);
        self.transport.close();
        self.signals.set(ConnectionState::Closed);
    }
}
