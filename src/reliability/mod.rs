//! Reliable-delivery layer.
//!
//! Turns the relay's at-least-once, possibly reordered delivery into
//! exactly-once in-order delivery per channel:
//!
//! - every outbound payload gets the next sequence number and stays in an
//!   unacked FIFO until the remote acknowledges it
//! - every inbound payload is acknowledged, but delivered only if it carries
//!   exactly the next expected sequence number
//! - the unacked FIFO is resent whenever the remote may have missed it
//!   (peer became reachable, transport reconnected)
//!
//! The state machine is sans-IO: it returns frames to send and payloads to
//! deliver, and the owner moves them. The state lives with the channel, not
//! the socket, so it survives reconnects.

mod frame;

pub use frame::ReliabilityFrame;

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, trace};

/// Outcome of an inbound data frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Received {
    /// Acknowledgement to send back, if any.
    pub ack: Option<ReliabilityFrame>,
    /// Payload to deliver upward, if this frame was the next in order.
    pub deliver: Option<Value>,
}

/// Per-channel sequence and acknowledgement state.
#[derive(Debug, Default)]
pub struct Reliability {
    /// Next sequence number expected from the remote.
    recv_seq: u64,
    /// Sequence number of the next outbound data frame.
    send_seq: u64,
    /// Sent data frames awaiting acknowledgement, oldest first.
    unacked: VecDeque<ReliabilityFrame>,
}

impl Reliability {
    /// Fresh state: both directions start at sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a payload in the next data frame and queue it for acknowledgement.
    ///
    /// The returned frame must be handed to the transport even while the
    /// remote is unreachable; it is resent later if lost.
    pub fn send(&mut self, data: Value) -> ReliabilityFrame {
        let frame = ReliabilityFrame::Data {
            seq: self.send_seq,
            data,
        };
        self.send_seq += 1;
        self.unacked.push_back(frame.clone());
        frame
    }

    /// Process an inbound frame of either kind.
    pub fn on_frame(&mut self, frame: ReliabilityFrame) -> Received {
        match frame {
            ReliabilityFrame::Data { seq, data } => self.on_data(seq, data),
            ReliabilityFrame::Ack { seq } => {
                self.on_ack(seq);
                Received::default()
            }
        }
    }

    /// Process an inbound data frame.
    ///
    /// Anything at or below the expected sequence is acknowledged, so a
    /// remote that missed our ack stops resending. Only the expected sequence
    /// is delivered.
    pub fn on_data(&mut self, seq: u64, data: Value) -> Received {
        let ack = (seq <= self.recv_seq).then(|| ReliabilityFrame::Ack { seq });

        if seq != self.recv_seq {
            trace!(seq, expected = self.recv_seq, "dropping out-of-order data");
            return Received { ack, deliver: None };
        }

        self.recv_seq += 1;
        Received {
            ack,
            deliver: Some(data),
        }
    }

    /// Process an inbound acknowledgement. Returns `true` if it retired the
    /// head of the unacked FIFO.
    pub fn on_ack(&mut self, seq: u64) -> bool {
        match self.unacked.front() {
            Some(head) if head.seq() == seq => {
                self.unacked.pop_front();
                true
            }
            Some(head) => {
                debug!(seq, head = head.seq(), "ignoring ack that does not match the unacked head");
                false
            }
            None => {
                debug!(seq, "ignoring ack with nothing unacked");
                false
            }
        }
    }

    /// The remote peer became reachable: resend everything unacked.
    pub fn on_peer_reachable(&self) -> Vec<ReliabilityFrame> {
        self.resend()
    }

    /// The transport reconnected: resend everything unacked.
    pub fn on_transport_reconnected(&self) -> Vec<ReliabilityFrame> {
        self.resend()
    }

    /// Number of frames awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.unacked.len()
    }

    /// Next sequence number expected from the remote.
    pub fn recv_seq(&self) -> u64 {
        self.recv_seq
    }

    /// Sequence number the next outbound frame will carry.
    pub fn send_seq(&self) -> u64 {
        self.send_seq
    }

    fn resend(&self) -> Vec<ReliabilityFrame> {
        if !self.unacked.is_empty() {
            debug!(count = self.unacked.len(), "resending unacked frames");
        }
        self.unacked.iter().cloned().collect()
    }
}
