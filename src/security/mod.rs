//! Message security layer.
//!
//! - [`SecurityFrame`]: the `NONE` / `JWT` envelope around each message
//! - [`MessageSigner`]: per-channel signing state, chosen by [`SigningConfig`]
//! - [`DeviceTokenMinter`] / [`DeviceTokenVerifier`]: Ed25519 identity tokens
//!   a device presents to the handshake service
//!
//! Message signing protects integrity and replay end to end, independent of
//! the relay. The device identity token only authenticates the device to the
//! relay's handshake service.

mod device_token;
mod envelope;
mod signer;

pub use device_token::*;
pub use envelope::SecurityFrame;
pub use signer::*;
