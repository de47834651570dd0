//! Negotiation payloads carried over a signaling channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::NegotiationError;

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// An offer.
    Offer,
    /// A provisional answer.
    Pranswer,
    /// A final answer.
    Answer,
    /// Rollback to the last stable state.
    Rollback,
}

/// A session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// SDP body.
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    /// An offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// An answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// A candidate with only the candidate line set.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// A STUN or TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs. A single string is accepted on decode.
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    /// TURN username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A server without credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Attach TURN credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }
}

/// Application message exchanged by the negotiation glue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalingMessage {
    /// Client asks the device for session setup.
    SetupRequest,
    /// Device answers with the ICE servers to use.
    SetupResponse {
        /// Servers chosen by the device.
        #[serde(rename = "iceServers", default, skip_serializing_if = "Option::is_none")]
        ice_servers: Option<Vec<IceServer>>,
    },
    /// Offer or answer.
    Description {
        /// The description.
        description: SessionDescription,
    },
    /// Trickled ICE candidate.
    Candidate {
        /// The candidate.
        candidate: IceCandidate,
    },
}

const MESSAGE_TYPES: [&str; 4] = ["SETUP_REQUEST", "SETUP_RESPONSE", "DESCRIPTION", "CANDIDATE"];

impl SignalingMessage {
    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetupRequest => MESSAGE_TYPES[0],
            Self::SetupResponse { .. } => MESSAGE_TYPES[1],
            Self::Description { .. } => MESSAGE_TYPES[2],
            Self::Candidate { .. } => MESSAGE_TYPES[3],
        }
    }

    /// Encode for [`ChannelHandle::send_message`](crate::channel::ChannelHandle::send_message).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode an application message.
    ///
    /// Returns `Ok(None)` for a message type this crate does not know.
    pub fn from_value(value: Value) -> Result<Option<Self>, NegotiationError> {
        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| MESSAGE_TYPES.contains(&t));
        if !known {
            return match value.get("type") {
                Some(Value::String(_)) => Ok(None),
                _ => Err(NegotiationError::InvalidMessage("missing type".into())),
            };
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| NegotiationError::InvalidMessage(e.to_string()))
    }
}
