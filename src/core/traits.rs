//! Core traits for the edge signaling stack.
//!
//! These traits are the application-facing seams of a channel.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::types::ChannelId;

/// Consumer of verified application messages on one channel.
///
/// A channel holds at most one handler. Messages are handed to it one at a
/// time: the next message is not delivered until `on_message` for the
/// previous one has returned, so a handler can await freely without being
/// re-entered or seeing messages out of order.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// #[async_trait]
/// impl MessageHandler for Printer {
///     async fn on_message(&self, channel_id: &ChannelId, message: Value) {
///         println!("{channel_id}: {message}");
///     }
/// }
///
/// channel.set_message_handler(Some(Arc::new(Printer)));
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message. Delivery of the next message waits for this call.
    async fn on_message(&self, channel_id: &ChannelId, message: Value);
}

/// Forward messages into an unbounded queue.
///
/// Useful for applications that prefer pulling messages over callbacks.
#[async_trait]
impl MessageHandler for mpsc::UnboundedSender<Value> {
    async fn on_message(&self, _channel_id: &ChannelId, message: Value) {
        let _ = self.send(message);
    }
}

/// Forward messages, tagged with their channel, into an unbounded queue.
#[async_trait]
impl MessageHandler for mpsc::UnboundedSender<(ChannelId, Value)> {
    async fn on_message(&self, channel_id: &ChannelId, message: Value) {
        let _ = self.send((channel_id.clone(), message));
    }
}
