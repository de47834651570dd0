//! Channel states.

use std::fmt;

/// State of one logical channel, shared by client and device channels.
///
/// ```text
/// NEW ──► ONLINE ⇄ OFFLINE
///  │        │        │
///  └────────┴────────┴──► FAILED | CLOSED   (terminal, sticky)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    /// Created; reachability of the remote peer not yet known.
    #[default]
    New,
    /// The remote peer is reachable.
    Online,
    /// The remote peer is unreachable. Sends are queued for resend.
    Offline,
    /// Terminated by a fatal error.
    Failed,
    /// Closed by either side.
    Closed,
}

impl ChannelState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Whether the remote peer is known to be reachable.
    pub fn is_online(self) -> bool {
        self == Self::Online
    }

    /// Upper-case display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Failed => "FAILED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
