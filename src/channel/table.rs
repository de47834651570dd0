//! Channels owned by one connection driver.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::channel::{Channel, ChannelOutput};
use super::handle::{ChannelCommand, ChannelEvent, ChannelHandle, HandlerSlot};
use super::state::ChannelState;
use crate::core::{ChannelId, MessageHandler, SignalingError};
use crate::security::SigningConfig;
use crate::transport::{RoutingFrame, RoutingTransport};

const EVENT_CAPACITY: usize = 64;

struct ChannelEntry {
    channel: Channel,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ChannelState>,
    deliveries: mpsc::UnboundedSender<Value>,
    handler: HandlerSlot,
    delivery: JoinHandle<()>,
}

impl ChannelEntry {
    /// Stop handing messages to the application, including any still
    /// queued or in flight.
    fn detach(&self) {
        self.handler.lock().take();
        self.delivery.abort();
    }
}

/// Live channels of a connection, keyed by relay channel id.
///
/// Applies channel outputs: frames go to the transport, messages to the
/// channel's delivery task, state and errors to its subscribers. A channel
/// that reaches a terminal state is removed.
pub(crate) struct ChannelTable {
    entries: HashMap<ChannelId, ChannelEntry>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    signing: SigningConfig,
}

impl ChannelTable {
    pub(crate) fn new(commands: mpsc::UnboundedSender<ChannelCommand>, signing: SigningConfig) -> Self {
        Self {
            entries: HashMap::new(),
            commands,
            signing,
        }
    }

    /// Create a channel in state `NEW` and spawn its delivery task.
    ///
    /// `handler` is installed before any message can be delivered.
    pub(crate) fn open(
        &mut self,
        id: ChannelId,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> ChannelHandle {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ChannelState::New);
        let (deliveries, delivery_rx) = mpsc::unbounded_channel();
        let handler: HandlerSlot = Arc::new(Mutex::new(handler));

        let delivery = tokio::spawn(deliver(id.clone(), delivery_rx, handler.clone()));

        let channel = Channel::new(id.clone(), self.signing.signer());
        self.entries.insert(
            id.clone(),
            ChannelEntry {
                channel,
                events: events.clone(),
                state: state_tx,
                deliveries,
                handler: handler.clone(),
                delivery,
            },
        );
        debug!(channel = %id, "channel opened");

        ChannelHandle::new(id, self.commands.clone(), events, state_rx, handler)
    }

    pub(crate) fn contains(&self, id: &ChannelId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `f` on one channel and apply its outputs. Returns `false` if the
    /// channel does not exist.
    pub(crate) fn with(
        &mut self,
        id: &ChannelId,
        transport: &RoutingTransport,
        f: impl FnOnce(&mut Channel) -> Vec<ChannelOutput>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        let outputs = f(&mut entry.channel);
        self.apply(id, outputs, transport);
        true
    }

    /// Run `f` on every channel.
    pub(crate) fn for_each(
        &mut self,
        transport: &RoutingTransport,
        mut f: impl FnMut(&mut Channel) -> Vec<ChannelOutput>,
    ) {
        let ids: Vec<ChannelId> = self.entries.keys().cloned().collect();
        for id in ids {
            self.with(&id, transport, &mut f);
        }
    }

    /// Close one channel locally. Its handler is detached before this
    /// returns; a remote teardown instead lets queued messages drain.
    pub(crate) fn close(&mut self, id: &ChannelId, transport: &RoutingTransport) {
        if let Some(entry) = self.entries.get(id) {
            entry.detach();
        }
        self.with(id, transport, Channel::close);
    }

    /// Close every channel locally.
    pub(crate) fn close_all(&mut self, transport: &RoutingTransport) {
        let ids: Vec<ChannelId> = self.entries.keys().cloned().collect();
        for id in ids {
            self.close(&id, transport);
        }
    }

    /// Route a relay frame to its channel.
    ///
    /// Returns the frame if no live channel matches, so the driver can apply
    /// its own policy for unknown channels.
    pub(crate) fn route(
        &mut self,
        frame: RoutingFrame,
        transport: &RoutingTransport,
    ) -> Option<RoutingFrame> {
        let id = frame.channel_id().cloned()?;
        if !self.contains(&id) {
            return Some(frame);
        }
        match frame {
            RoutingFrame::Message { message, .. } => {
                self.with(&id, transport, |ch| ch.on_message(message));
            }
            RoutingFrame::Error { error, .. } => {
                self.with(&id, transport, |ch| ch.on_error(error.into()));
            }
            RoutingFrame::PeerConnected { .. } => {
                self.with(&id, transport, Channel::on_peer_connected);
            }
            RoutingFrame::PeerOffline { .. } => {
                self.with(&id, transport, Channel::on_peer_offline);
            }
            RoutingFrame::Ping | RoutingFrame::Pong => {}
        }
        None
    }

    /// Serve a handle command. `CheckAlive` needs the transport mutably and
    /// is left to the driver.
    pub(crate) fn handle_command(&mut self, command: ChannelCommand, transport: &RoutingTransport) {
        match command {
            ChannelCommand::Send {
                channel_id,
                message,
                reply,
            } => {
                let result = match self.entries.get_mut(&channel_id) {
                    Some(entry) => entry.channel.send_message(message),
                    None => Err(SignalingError::ChannelClosed),
                };
                let result = result.map(|outputs| self.apply(&channel_id, outputs, transport));
                let _ = reply.send(result);
            }
            ChannelCommand::Close { channel_id, done } => {
                self.close(&channel_id, transport);
                let _ = done.send(());
            }
            ChannelCommand::PendingAcks { channel_id, reply } => {
                let count = self
                    .entries
                    .get(&channel_id)
                    .map_or(0, |entry| entry.channel.pending_acks());
                let _ = reply.send(count);
            }
            ChannelCommand::CheckAlive { .. } => {}
        }
    }

    fn apply(&mut self, id: &ChannelId, outputs: Vec<ChannelOutput>, transport: &RoutingTransport) {
        let Some(entry) = self.entries.get(id) else {
            return;
        };

        for output in outputs {
            match output {
                ChannelOutput::Send(frame) => {
                    if let Err(e) = transport.send(id, frame) {
                        debug!(channel = %id, "frame not sent ({}), left for resend", e);
                    }
                }
                ChannelOutput::SendError(error) => {
                    if let Err(e) = transport.send_error(id, error) {
                        debug!(channel = %id, "error frame not sent: {}", e);
                    }
                }
                ChannelOutput::Deliver(message) => {
                    let _ = entry.deliveries.send(message);
                }
                ChannelOutput::StateChanged(state) => {
                    entry.state.send_replace(state);
                    let _ = entry.events.send(ChannelEvent::StateChanged(state));
                }
                ChannelOutput::Error(error) => {
                    let _ = entry.events.send(ChannelEvent::Error(error));
                }
            }
        }

        if entry.channel.state().is_terminal() {
            debug!(channel = %id, state = %entry.channel.state(), "channel removed");
            self.entries.remove(id);
        }
    }
}

/// Hand delivered messages to the handler, one at a time, in order.
async fn deliver(channel_id: ChannelId, mut messages: mpsc::UnboundedReceiver<Value>, handler: HandlerSlot) {
    while let Some(message) = messages.recv().await {
        let current = handler.lock().clone();
        match current {
            Some(handler) => handler.on_message(&channel_id, message).await,
            None => warn!(channel = %channel_id, "no message handler, dropping message"),
        }
    }
    handler.lock().take();
}
