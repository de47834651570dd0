//! Application handle to a channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::state::ChannelState;
use crate::core::{ChannelId, MessageHandler, SignalingError};

/// The single message handler slot of a channel.
pub(crate) type HandlerSlot = Arc<Mutex<Option<Arc<dyn MessageHandler>>>>;

/// Event emitted by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel state changed.
    StateChanged(ChannelState),
    /// A fatal error terminated the channel. Emitted once.
    Error(SignalingError),
}

/// Request from a handle to the driver owning the channel.
#[derive(Debug)]
pub(crate) enum ChannelCommand {
    Send {
        channel_id: ChannelId,
        message: Value,
        reply: oneshot::Sender<Result<(), SignalingError>>,
    },
    Close {
        channel_id: ChannelId,
        done: oneshot::Sender<()>,
    },
    CheckAlive {
        timeout: Duration,
    },
    PendingAcks {
        channel_id: ChannelId,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to one logical channel.
///
/// All protocol state lives in the connection driver; the handle only sends
/// it commands and observes the channel's state and events.
#[derive(Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Receiver<ChannelState>,
    handler: HandlerSlot,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ChannelHandle {
    pub(crate) fn new(
        id: ChannelId,
        commands: mpsc::UnboundedSender<ChannelCommand>,
        events: broadcast::Sender<ChannelEvent>,
        state: watch::Receiver<ChannelState>,
        handler: HandlerSlot,
    ) -> Self {
        Self {
            id,
            commands,
            events,
            state,
            handler,
        }
    }

    /// Channel id.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch the state.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Subscribe to state changes and the terminal error.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Wait until the state satisfies `predicate` and return it.
    ///
    /// Returns the last state if the owning connection went away first.
    pub async fn wait_for_state(&self, predicate: impl FnMut(&ChannelState) -> bool) -> ChannelState {
        let mut state = self.state.clone();
        if let Ok(s) = state.wait_for(predicate).await {
            return *s;
        }
        let last = *state.borrow();
        last
    }

    /// Install or clear the message handler.
    ///
    /// Messages that arrive while no handler is installed are dropped.
    pub fn set_message_handler(&self, handler: Option<Arc<dyn MessageHandler>>) {
        *self.handler.lock() = handler;
    }

    /// Send an application message.
    ///
    /// Succeeds once the message is signed and queued; delivery is
    /// guaranteed by the reliability layer while the channel lives, even if
    /// the remote peer is currently offline.
    pub async fn send_message(&self, message: Value) -> Result<(), SignalingError> {
        if self.state().is_terminal() {
            return Err(SignalingError::ChannelClosed);
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ChannelCommand::Send {
                channel_id: self.id.clone(),
                message,
                reply,
            })
            .map_err(|_| SignalingError::Shutdown)?;
        rx.await.map_err(|_| SignalingError::Shutdown)?
    }

    /// Close the channel, telling the remote peer. Idempotent.
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        let sent = self.commands.send(ChannelCommand::Close {
            channel_id: self.id.clone(),
            done,
        });
        if sent.is_ok() {
            let _ = rx.await;
        }
        self.set_message_handler(None);
    }

    /// Probe the relay connection; a missing pong within `timeout` forces a
    /// reconnect.
    pub fn check_alive(&self, timeout: Duration) {
        let _ = self.commands.send(ChannelCommand::CheckAlive { timeout });
    }

    /// Number of sent messages not yet acknowledged by the remote peer.
    pub async fn pending_acks(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        let sent = self.commands.send(ChannelCommand::PendingAcks {
            channel_id: self.id.clone(),
            reply,
        });
        if sent.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
