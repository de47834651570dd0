//! Signaling client.
//!
//! The client side of a client-device session: one handshake, one relay
//! socket, one channel. See [`SignalingClient`].

#[allow(clippy::module_inception)]
mod client;
mod driver;

pub use client::{ClientConfig, SignalingClient, SignalingClientBuilder};
