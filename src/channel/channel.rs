//! Per-channel protocol state machine.
//!
//! A [`Channel`] owns the reliability and signing state of one logical
//! channel. It is sans-IO: every input returns the [`ChannelOutput`]s its
//! owner must act on, in order.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::state::ChannelState;
use crate::core::{ChannelId, ErrorCode, ProtocolError, SecurityError, SignalingError};
use crate::reliability::{Reliability, ReliabilityFrame};
use crate::security::{MessageSigner, SecurityFrame};

/// Action requested by a [`Channel`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutput {
    /// Send a reliability frame to the remote peer.
    Send(Value),
    /// Send a protocol error to the remote peer.
    SendError(ProtocolError),
    /// Hand a verified application message to the message handler.
    Deliver(Value),
    /// The channel state changed.
    StateChanged(ChannelState),
    /// A fatal error terminated the channel.
    Error(SignalingError),
}

/// State machine of one logical channel.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    state: ChannelState,
    reliability: Reliability,
    signer: Box<dyn MessageSigner>,
}

impl Channel {
    /// New channel in state `NEW`.
    pub fn new(id: ChannelId, signer: Box<dyn MessageSigner>) -> Self {
        Self {
            id,
            state: ChannelState::New,
            reliability: Reliability::new(),
            signer,
        }
    }

    /// Channel id.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Frames awaiting acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.reliability.pending_count()
    }

    /// Sign and queue an application message.
    ///
    /// The frame goes to the transport even while the peer is offline; the
    /// reliability layer resends it when the peer becomes reachable.
    pub fn send_message(&mut self, message: Value) -> Result<Vec<ChannelOutput>, SignalingError> {
        if self.state.is_terminal() {
            return Err(SignalingError::ChannelClosed);
        }
        let envelope = self.signer.sign(message)?;
        let frame = self.reliability.send(envelope.to_value());
        Ok(vec![ChannelOutput::Send(frame.to_value())])
    }

    /// The relay reports the remote peer reachable.
    pub fn on_peer_connected(&mut self) -> Vec<ChannelOutput> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            return out;
        }
        self.set_state(ChannelState::Online, &mut out);
        out.extend(
            self.reliability
                .on_peer_reachable()
                .into_iter()
                .map(|frame| ChannelOutput::Send(frame.to_value())),
        );
        out
    }

    /// The relay reports the remote peer unreachable.
    pub fn on_peer_offline(&mut self) -> Vec<ChannelOutput> {
        let mut out = Vec::new();
        self.set_state(ChannelState::Offline, &mut out);
        out
    }

    /// The connection re-established its socket.
    pub fn on_transport_reconnected(&mut self) -> Vec<ChannelOutput> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.reliability
            .on_transport_reconnected()
            .into_iter()
            .map(|frame| ChannelOutput::Send(frame.to_value()))
            .collect()
    }

    /// A reliability frame arrived for this channel.
    pub fn on_message(&mut self, message: Value) -> Vec<ChannelOutput> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            debug!(channel = %self.id, "dropping message for terminated channel");
            return out;
        }

        let frame = match ReliabilityFrame::from_value(message) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(channel = %self.id, "dropping reliability frame of unknown type");
                return out;
            }
            Err(e) => {
                self.fail_security(SecurityError::Decode(e.to_string()), &mut out);
                return out;
            }
        };

        let received = self.reliability.on_frame(frame);
        if let Some(ack) = received.ack {
            out.push(ChannelOutput::Send(ack.to_value()));
        }
        if let Some(data) = received.deliver {
            match self.open_envelope(data) {
                Ok(Some(message)) => out.push(ChannelOutput::Deliver(message)),
                Ok(None) => warn!(channel = %self.id, "dropping envelope of unknown type"),
                Err(e) => self.fail_security(e, &mut out),
            }
        }
        out
    }

    /// The remote peer or relay reported a protocol error.
    ///
    /// `CHANNEL_CLOSED` is a graceful remote teardown; anything else fails
    /// the channel.
    pub fn on_error(&mut self, error: ProtocolError) -> Vec<ChannelOutput> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            return out;
        }
        if error.is_channel_closed() {
            info!(channel = %self.id, "channel closed by remote");
            self.set_state(ChannelState::Closed, &mut out);
        } else {
            warn!(channel = %self.id, "channel failed by remote: {}", error);
            self.set_state(ChannelState::Failed, &mut out);
            out.push(ChannelOutput::Error(SignalingError::Protocol(error)));
        }
        out
    }

    /// Local close. Sends `CHANNEL_CLOSED` from any live state, reachable or
    /// not; the relay drops it if the remote is away. Idempotent.
    pub fn close(&mut self) -> Vec<ChannelOutput> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            return out;
        }
        out.push(ChannelOutput::SendError(ProtocolError::new(ErrorCode::ChannelClosed)));
        self.set_state(ChannelState::Closed, &mut out);
        out
    }

    /// The owning connection gave up.
    pub fn on_connection_failed(&mut self, error: SignalingError) -> Vec<ChannelOutput> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            return out;
        }
        self.set_state(ChannelState::Failed, &mut out);
        out.push(ChannelOutput::Error(error));
        out
    }

    fn open_envelope(&mut self, data: Value) -> Result<Option<Value>, SecurityError> {
        match SecurityFrame::from_value(data)? {
            Some(envelope) => self.signer.verify(envelope).map(Some),
            None => Ok(None),
        }
    }

    fn fail_security(&mut self, error: SecurityError, out: &mut Vec<ChannelOutput>) {
        warn!(channel = %self.id, "security failure: {}", error);
        out.push(ChannelOutput::SendError(ProtocolError::with_message(
            error.code(),
            error.to_string(),
        )));
        self.set_state(ChannelState::Failed, out);
        out.push(ChannelOutput::Error(SignalingError::Security(error)));
    }

    /// Transition unless terminal or unchanged.
    fn set_state(&mut self, next: ChannelState, out: &mut Vec<ChannelOutput>) {
        if self.state.is_terminal() || self.state == next {
            return;
        }
        debug!(channel = %self.id, from = %self.state, to = %next, "channel state");
        self.state = next;
        out.push(ChannelOutput::StateChanged(next));
    }
}
