//! Logical channels.
//!
//! A channel is one client-device conversation multiplexed over a relay
//! socket. It owns its reliability and signing state, so both survive
//! socket reconnects.
//!
//! - [`Channel`]: the sans-IO state machine
//! - [`ChannelHandle`]: what applications hold
//! - [`ChannelState`]: `NEW`, `ONLINE`, `OFFLINE`, then terminal `FAILED` or
//!   `CLOSED`

#[allow(clippy::module_inception)]
mod channel;
mod handle;
mod state;
mod table;

pub use channel::{Channel, ChannelOutput};
pub(crate) use handle::ChannelCommand;
pub use handle::{ChannelEvent, ChannelHandle};
pub use state::ChannelState;
pub(crate) use table::ChannelTable;
