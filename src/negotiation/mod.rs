//! Media negotiation glue.
//!
//! Carries WebRTC-style session setup over a signaling channel:
//!
//! - [`SignalingMessage`]: the `SETUP_REQUEST` / `SETUP_RESPONSE` /
//!   `DESCRIPTION` / `CANDIDATE` payloads
//! - [`PerfectNegotiation`]: collision-free offer/answer, device polite,
//!   client impolite
//! - [`NegotiationSession`]: a [`MessageHandler`](crate::core::MessageHandler)
//!   dispatching incoming payloads
//! - [`ConnectivityBridge`]: reacts to media and signaling connectivity
//!
//! The media stack itself is abstracted by [`MediaConnection`].

mod bridge;
mod message;
mod perfect;
mod session;

pub use bridge::{BridgeConfig, ConnectivityBridge, MediaConnectionState};
pub use message::{IceCandidate, IceServer, SdpType, SessionDescription, SignalingMessage};
pub use perfect::{MediaConnection, PerfectNegotiation, SignalingSink, SignalingState};
pub use session::{NegotiationSession, Role};
