//! Connection state shared by the client and device drivers.
//!
//! A connection is one local peer's relay socket plus its reconnect policy.
//! The client and device differ in how they reconnect:
//!
//! | | client | device |
//! |---|---|---|
//! | handshake | once | every attempt, fresh identity token |
//! | backoff | `2^attempt` s, 8 attempts | `2^counter` s (60 s cap) + jitter, unbounded |
//! | rate limit | n/a | exact `Retry-After` |

mod backoff;
mod state;

pub use backoff::{parse_retry_after, ClientBackoff, DeviceBackoff};
pub(crate) use state::ConnectionSignals;
pub use state::{ConnectionEvent, ConnectionState};
