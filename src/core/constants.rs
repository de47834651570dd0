//! Protocol constants for the edge signaling stack.
//!
//! Wire tags are fixed by the relay protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// ROUTING FRAME TYPES
// =============================================================================

/// Application message routed to a channel.
pub const FRAME_TYPE_MESSAGE: &str = "MESSAGE";

/// Protocol error for a channel.
pub const FRAME_TYPE_ERROR: &str = "ERROR";

/// The remote peer of a channel became reachable.
pub const FRAME_TYPE_PEER_CONNECTED: &str = "PEER_CONNECTED";

/// The remote peer of a channel became unreachable.
pub const FRAME_TYPE_PEER_OFFLINE: &str = "PEER_OFFLINE";

/// Liveness probe.
pub const FRAME_TYPE_PING: &str = "PING";

/// Liveness probe answer.
pub const FRAME_TYPE_PONG: &str = "PONG";

/// Every routing frame type this implementation understands.
pub const ROUTING_FRAME_TYPES: [&str; 6] = [
    FRAME_TYPE_MESSAGE,
    FRAME_TYPE_ERROR,
    FRAME_TYPE_PEER_CONNECTED,
    FRAME_TYPE_PEER_OFFLINE,
    FRAME_TYPE_PING,
    FRAME_TYPE_PONG,
];

// =============================================================================
// RELIABILITY FRAME TYPES
// =============================================================================

/// Acknowledgement of a data frame.
pub const RELIABILITY_TYPE_ACK: &str = "ACK";

/// Sequenced application payload.
pub const RELIABILITY_TYPE_DATA: &str = "DATA";

// =============================================================================
// CLIENT RECONNECT POLICY
// =============================================================================

/// Maximum reconnect attempts before the client connection fails.
pub const CLIENT_MAX_RECONNECT_ATTEMPTS: u32 = 8;

// =============================================================================
// DEVICE RECONNECT POLICY
// =============================================================================

/// Attempt counter above which the device backoff base is capped.
pub const DEVICE_BACKOFF_CAP_AFTER_ATTEMPTS: u32 = 6;

/// Backoff base once the attempt counter passed the cap threshold.
pub const DEVICE_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Continuous connected time after which the device attempt counter resets.
pub const DEVICE_BACKOFF_RESET_AFTER: Duration = Duration::from_secs(10);

/// Retry delay used when a `Retry-After` value is missing, negative or unparseable.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(300);

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Default timeout for a liveness probe.
pub const DEFAULT_CHECK_ALIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default window for a device channel to reach an established media connection.
pub const DEFAULT_IDLE_SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifetime of a minted device identity token.
pub const DEVICE_TOKEN_TTL: Duration = Duration::from_secs(3600);

// =============================================================================
// DEVICE IDENTITY
// =============================================================================

/// Prefix of the resource URN carried by device identity tokens.
pub const RESOURCE_URN_PREFIX: &str = "urn:edge-signaling";

/// Scope requested by device identity tokens.
pub const DEVICE_TOKEN_SCOPE: &str = "signaling:device";

/// Default cap on concurrent device channels.
pub const DEFAULT_MAX_CHANNELS: usize = 64;
