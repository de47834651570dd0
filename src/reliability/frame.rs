//! Reliability frame format.
//!
//! ```text
//! {"type":"DATA","seq":0,"data":{...}}
//! {"type":"ACK","seq":0}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{RELIABILITY_TYPE_ACK, RELIABILITY_TYPE_DATA};

/// A frame of the reliable-delivery layer, carried inside a routing `MESSAGE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReliabilityFrame {
    /// Acknowledges the data frame with the same sequence number.
    Ack {
        /// Acknowledged sequence number.
        seq: u64,
    },
    /// One application payload.
    Data {
        /// Sequence number, starting at 0 per direction per channel.
        seq: u64,
        /// Security envelope.
        data: Value,
    },
}

impl ReliabilityFrame {
    /// Sequence number of the frame.
    pub fn seq(&self) -> u64 {
        match self {
            Self::Ack { seq } | Self::Data { seq, .. } => *seq,
        }
    }

    /// Encode as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode a JSON value.
    ///
    /// Returns `Ok(None)` for an object whose `type` is not a reliability
    /// frame type.
    pub fn from_value(value: Value) -> Result<Option<Self>, serde_json::Error> {
        match value.get("type").and_then(Value::as_str) {
            Some(RELIABILITY_TYPE_ACK) | Some(RELIABILITY_TYPE_DATA) => {
                serde_json::from_value(value).map(Some)
            }
            Some(_) => Ok(None),
            None => serde_json::from_value::<Self>(value).map(Some),
        }
    }
}
