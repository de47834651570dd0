//! Routing transport layer.
//!
//! One persistent relay socket per local peer. Frames carry a discriminated
//! `type` and, except for liveness frames, a `channelId` that multiplexes
//! many logical channels over the socket.
//!
//! - **Frame codec**: [`RoutingFrame`] with forward compatible decoding
//! - **Socket seam**: [`Connector`] and, with the `websocket` feature,
//!   [`WebSocketConnector`]
//! - **Transport**: [`RoutingTransport`] with forced abort and
//!   [`check_alive`](RoutingTransport::check_alive) probing
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Connection / channel state          │
//! ├─────────────────────────────────────────┤
//! │         Routing transport               │  ← This module
//! │   frames, ping/pong, abort              │
//! ├─────────────────────────────────────────┤
//! │        WebSocket to relay               │
//! └─────────────────────────────────────────┘
//! ```

mod frame;
mod liveness;
mod routing;
mod socket;

pub use frame::*;
pub use liveness::{sleep_until_opt, LivenessProbe};
pub use routing::*;
pub use socket::*;
