//! Routing transport: one relay socket multiplexing many channels.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::frame::RoutingFrame;
use super::liveness::{sleep_until_opt, LivenessProbe};
use super::socket::{Connector, OutboundFrame, SocketConnection, SocketEvent};
use crate::core::{ChannelId, ProtocolError, TransportError};

/// Event surfaced by [`RoutingTransport::next_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A channel-addressed frame arrived. Ping and pong never surface here.
    Frame(RoutingFrame),

    /// The socket is gone.
    Lost {
        /// Why the socket went away.
        error: TransportError,
        /// `false` when the socket never opened, which makes the loss fatal
        /// for the connect attempt.
        recoverable: bool,
    },

    /// A liveness probe expired without a pong.
    LivenessFailed,
}

/// Relay socket with frame codec, forced abort and liveness probing.
///
/// The transport owns at most one socket at a time. It never reconnects on
/// its own; the owning connection state machine decides when to call
/// [`connect`](Self::connect) again.
pub struct RoutingTransport {
    connector: Arc<dyn Connector>,
    socket: Option<SocketConnection>,
    has_opened: bool,
    liveness: LivenessProbe,
}

impl std::fmt::Debug for RoutingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTransport")
            .field("open", &self.socket.is_some())
            .field("has_opened", &self.has_opened)
            .field("liveness", &self.liveness)
            .finish()
    }
}

impl RoutingTransport {
    /// Create a transport that opens sockets with `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            socket: None,
            has_opened: false,
            liveness: LivenessProbe::new(),
        }
    }

    /// Open a socket to `url`, replacing any current socket.
    pub async fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        self.release_socket();
        let socket = self.connector.connect(url).await?;
        debug!(url, "relay socket open");
        self.socket = Some(socket);
        self.has_opened = true;
        Ok(())
    }

    /// Whether any socket ever opened on this transport.
    pub fn has_opened(&self) -> bool {
        self.has_opened
    }

    /// Whether a socket is currently open.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Close the current socket gracefully.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.outbound.send(OutboundFrame::Close);
        }
        self.liveness.cancel();
    }

    /// Drop the current socket immediately and synthesize its loss.
    ///
    /// Used when the socket is presumed dead; a graceful close could stall
    /// on a peer that no longer answers.
    pub fn force_abort(&mut self) -> TransportEvent {
        self.release_socket();
        debug!("relay socket aborted");
        self.lost(TransportError::Aborted)
    }

    /// Send a reliability frame to a channel.
    pub fn send(&self, channel_id: &ChannelId, message: Value) -> Result<(), TransportError> {
        self.send_frame(&RoutingFrame::message(channel_id.clone(), message))
    }

    /// Send a protocol error to a channel.
    pub fn send_error(
        &self,
        channel_id: &ChannelId,
        error: ProtocolError,
    ) -> Result<(), TransportError> {
        self.send_frame(&RoutingFrame::error(channel_id.clone(), error))
    }

    /// Send any routing frame.
    pub fn send_frame(&self, frame: &RoutingFrame) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        trace!(?frame, "relay send");
        socket
            .outbound
            .send(OutboundFrame::Text(frame.encode()))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Probe the relay with a ping.
    ///
    /// Returns `true` if a ping went out; `false` if a probe is already
    /// outstanding or no socket is open.
    pub fn check_alive(&mut self, timeout: Duration) -> bool {
        if self.socket.is_none() || !self.liveness.start(timeout) {
            return false;
        }
        if self.send_frame(&RoutingFrame::Ping).is_err() {
            self.liveness.cancel();
            return false;
        }
        debug!(?timeout, "liveness probe sent");
        true
    }

    /// Whether a liveness probe is outstanding.
    pub fn is_probing(&self) -> bool {
        self.liveness.is_pending()
    }

    /// Wait for the next transport event.
    ///
    /// Pends forever while no socket is open. Cancel safe.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            let deadline = self.liveness.deadline();
            let Some(socket) = self.socket.as_mut() else {
                return std::future::pending().await;
            };

            let event = tokio::select! {
                event = socket.inbound.recv() => Some(event),
                _ = sleep_until_opt(deadline) => None,
            };

            let Some(event) = event else {
                self.liveness.cancel();
                warn!("liveness probe timed out");
                return TransportEvent::LivenessFailed;
            };

            match event {
                Some(SocketEvent::Text(text)) => {
                    if let Some(frame) = self.decode(&text) {
                        return TransportEvent::Frame(frame);
                    }
                }
                Some(SocketEvent::Closed) | None => {
                    self.release_socket();
                    return self.lost(TransportError::Closed);
                }
                Some(SocketEvent::Error(reason)) => {
                    self.release_socket();
                    return self.lost(TransportError::Socket(reason));
                }
            }
        }
    }

    /// Decode one text frame, answering pings and consuming pongs.
    fn decode(&mut self, text: &str) -> Option<RoutingFrame> {
        match RoutingFrame::decode(text) {
            Ok(Some(RoutingFrame::Ping)) => {
                let _ = self.send_frame(&RoutingFrame::Pong);
                None
            }
            Ok(Some(RoutingFrame::Pong)) => {
                trace!("pong");
                self.liveness.on_pong();
                None
            }
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                warn!(frame = text, "dropping routing frame of unknown type");
                None
            }
            Err(e) => {
                warn!("dropping undecodable routing frame: {}", e);
                None
            }
        }
    }

    fn release_socket(&mut self) {
        self.socket = None;
        self.liveness.cancel();
    }

    fn lost(&self, error: TransportError) -> TransportEvent {
        TransportEvent::Lost {
            error,
            recoverable: self.has_opened,
        }
    }
}
