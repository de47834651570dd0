//! Routing frame encoding and decoding.
//!
//! Routing frames are JSON objects discriminated by `type`:
//!
//! ```text
//! {"type":"MESSAGE","channelId":"c1","message":{...},"authorized":true}
//! {"type":"ERROR","channelId":"c1","error":{"code":"CHANNEL_CLOSED","message":"bye"}}
//! {"type":"PEER_CONNECTED","channelId":"c1"}
//! {"type":"PEER_OFFLINE","channelId":"c1"}
//! {"type":"PING"}
//! {"type":"PONG"}
//! ```
//!
//! Unknown sibling fields are ignored. A frame whose `type` is not one of the
//! above decodes to `Ok(None)` so callers can log and drop it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ChannelId, ErrorCode, ProtocolError, ROUTING_FRAME_TYPES};

/// Error body of an `ERROR` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Protocol error code.
    pub code: ErrorCode,
    /// Optional detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ProtocolError> for ErrorBody {
    fn from(error: ProtocolError) -> Self {
        Self {
            code: error.code,
            message: error.message,
        }
    }
}

impl From<ErrorBody> for ProtocolError {
    fn from(body: ErrorBody) -> Self {
        Self {
            code: body.code,
            message: body.message,
        }
    }
}

/// A frame exchanged with the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingFrame {
    /// Payload for a channel.
    Message {
        /// Target or source channel.
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
        /// Reliability frame carried for the channel.
        message: Value,
        /// Set by the relay when the sender was authorized.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authorized: Option<bool>,
    },
    /// Protocol error for a channel.
    Error {
        /// Affected channel.
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
        /// Error detail.
        error: ErrorBody,
    },
    /// The remote peer of a channel is reachable.
    PeerConnected {
        /// Affected channel.
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
    },
    /// The remote peer of a channel is unreachable.
    PeerOffline {
        /// Affected channel.
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
    },
    /// Liveness probe.
    Ping,
    /// Liveness probe answer.
    Pong,
}

/// Errors decoding a routing frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    /// The text is not a JSON object with a string `type`.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame has a known `type` but invalid fields.
    #[error("invalid {frame_type} frame: {reason}")]
    InvalidFields {
        /// The frame type.
        frame_type: String,
        /// What was wrong.
        reason: String,
    },
}

impl RoutingFrame {
    /// Build a `MESSAGE` frame without the relay-owned `authorized` flag.
    pub fn message(channel_id: ChannelId, message: Value) -> Self {
        Self::Message {
            channel_id,
            message,
            authorized: None,
        }
    }

    /// Build an `ERROR` frame.
    pub fn error(channel_id: ChannelId, error: ProtocolError) -> Self {
        Self::Error {
            channel_id,
            error: error.into(),
        }
    }

    /// Channel this frame refers to, if any.
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::Message { channel_id, .. }
            | Self::Error { channel_id, .. }
            | Self::PeerConnected { channel_id }
            | Self::PeerOffline { channel_id } => Some(channel_id),
            Self::Ping | Self::Pong => None,
        }
    }

    /// Encode as JSON text.
    pub fn encode(&self) -> String {
        // Serializing these variants cannot fail: every field is a string,
        // bool, or an already-valid JSON value.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode JSON text.
    ///
    /// Returns `Ok(None)` for a well-formed frame with an unrecognized `type`.
    pub fn decode(text: &str) -> Result<Option<Self>, FrameDecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameDecodeError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Option<Self>, FrameDecodeError> {
        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameDecodeError::Malformed("missing string `type`".into()))?
            .to_string();

        if !ROUTING_FRAME_TYPES.contains(&frame_type.as_str()) {
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| FrameDecodeError::InvalidFields {
                frame_type,
                reason: e.to_string(),
            })
    }
}
