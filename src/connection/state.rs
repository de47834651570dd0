//! Connection states and events.

use std::fmt;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::core::SignalingError;

/// State of a local peer's relay connection.
///
/// ```text
/// NEW ──► CONNECTING ──► CONNECTED ⇄ WAIT_RETRY
///              │                         │
///              └──────────► FAILED ◄─────┘      CLOSED from anywhere
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not started.
    #[default]
    New,
    /// Handshake or socket open in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting for the next reconnect attempt.
    WaitRetry,
    /// Gave up. Terminal.
    Failed,
    /// Closed locally. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Upper-case display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::WaitRetry => "WAIT_RETRY",
            Self::Failed => "FAILED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// The socket was re-established after an earlier successful connect.
    Reconnected,
    /// A fatal error ended the connection. Emitted once.
    Error(SignalingError),
}

const EVENT_CAPACITY: usize = 64;

/// Publishes connection state and events from a driver.
#[derive(Debug)]
pub(crate) struct ConnectionSignals {
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionSignals {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn events(&self) -> broadcast::Sender<ConnectionEvent> {
        self.events.clone()
    }

    /// Transition and notify; no-op if unchanged or already terminal.
    pub(crate) fn set(&self, next: ConnectionState) {
        let current = self.state();
        if current.is_terminal() || current == next {
            return;
        }
        debug!(from = %current, to = %next, "connection state");
        self.state.send_replace(next);
        let _ = self.events.send(ConnectionEvent::StateChanged(next));
    }

    pub(crate) fn reconnected(&self) {
        let _ = self.events.send(ConnectionEvent::Reconnected);
    }

    pub(crate) fn error(&self, error: SignalingError) {
        let _ = self.events.send(ConnectionEvent::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_is_sticky() {
        let signals = ConnectionSignals::new();
        let mut events = signals.events().subscribe();

        signals.set(ConnectionState::Connecting);
        signals.set(ConnectionState::Connecting);
        signals.set(ConnectionState::Failed);
        signals.set(ConnectionState::Connected);

        assert_eq!(signals.state(), ConnectionState::Failed);
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::StateChanged(ConnectionState::Failed)
        );
        assert!(events.try_recv().is_err());
    }
}
