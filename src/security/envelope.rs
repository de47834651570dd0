//! Security envelope carried in the `data` field of a reliability frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::SecurityError;

/// Signed or unsigned wrapper around one application message.
///
/// ```text
/// {"type":"NONE","message":{...}}
/// {"type":"JWT","jwt":"<compact JWS>"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecurityFrame {
    /// No integrity or replay protection.
    #[serde(rename = "NONE")]
    Unsigned {
        /// The application message.
        message: Value,
    },
    /// HS256-signed claims carrying the message.
    #[serde(rename = "JWT")]
    Jwt {
        /// Compact JWS.
        jwt: String,
    },
}

impl SecurityFrame {
    /// Encode as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode a JSON value.
    ///
    /// Returns `Ok(None)` for an envelope type this implementation does not
    /// know.
    pub fn from_value(value: Value) -> Result<Option<Self>, SecurityError> {
        match value.get("type").and_then(Value::as_str) {
            Some("NONE") | Some("JWT") => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| SecurityError::Decode(e.to_string())),
            Some(_) => Ok(None),
            None => Err(SecurityError::Decode(
                "security envelope without a string `type`".into(),
            )),
        }
    }

    /// Wire name of the envelope type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unsigned { .. } => "NONE",
            Self::Jwt { .. } => "JWT",
        }
    }
}
