//! Error types for the edge signaling stack.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error code carried in `ERROR` routing frames.
///
/// Codes this implementation does not know are preserved verbatim in
/// [`ErrorCode::Other`] so they can be logged and forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// A frame could not be decoded.
    DecodeError,
    /// A signed message failed signature or replay checks.
    VerificationError,
    /// The remote side closed the channel gracefully.
    ChannelClosed,
    /// The relay or peer does not know the channel.
    ChannelNotFound,
    /// The device refuses additional channels.
    NoMoreChannels,
    /// The sender is not authorized.
    AccessDenied,
    /// Unspecified internal failure.
    InternalError,
    /// A code this implementation does not recognize.
    Other(String),
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &str {
        match self {
            Self::DecodeError => "DECODE_ERROR",
            Self::VerificationError => "VERIFICATION_ERROR",
            Self::ChannelClosed => "CHANNEL_CLOSED",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::NoMoreChannels => "NO_MORE_CHANNELS",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "DECODE_ERROR" => Self::DecodeError,
            "VERIFICATION_ERROR" => Self::VerificationError,
            "CHANNEL_CLOSED" => Self::ChannelClosed,
            "CHANNEL_NOT_FOUND" => Self::ChannelNotFound,
            "NO_MORE_CHANNELS" => Self::NoMoreChannels,
            "ACCESS_DENIED" => Self::AccessDenied,
            "INTERNAL_ERROR" => Self::InternalError,
            _ => Self::Other(code),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol error exchanged with, or reported about, a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Error code.
    pub code: ErrorCode,
    /// Optional human readable detail.
    pub message: Option<String>,
}

impl ProtocolError {
    /// Create an error with a code and no detail.
    pub fn new(code: ErrorCode) -> Self {
        Self { code, message: None }
    }

    /// Create an error with a code and a detail message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Whether this error is a graceful remote teardown.
    ///
    /// Such errors are never surfaced as user-facing errors.
    pub fn is_channel_closed(&self) -> bool {
        self.code == ErrorCode::ChannelClosed
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors in the routing transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The socket closed.
    #[error("socket closed")]
    Closed,

    /// The socket reported an error.
    #[error("socket error: {0}")]
    Socket(String),

    /// The socket was aborted locally without waiting for a close handshake.
    #[error("socket aborted")]
    Aborted,

    /// No socket is open.
    #[error("not connected")]
    NotConnected,
}

/// Errors in the message security layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// The envelope or token could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Signature, sequence or nonce check failed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// A second message was signed before any inbound message was verified.
    #[error("cannot sign message {seq} before a remote message has been verified")]
    RemoteNonceUnknown {
        /// Sequence number that was about to be signed.
        seq: u64,
    },

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl SecurityError {
    /// Protocol code reported to the remote peer for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Decode(_) => ErrorCode::DecodeError,
            Self::Verification(_) => ErrorCode::VerificationError,
            Self::RemoteNonceUnknown { .. } | Self::Signing(_) => ErrorCode::InternalError,
        }
    }
}

/// Errors returned by the HTTP handshake.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// 404 - the product or device does not exist.
    #[error("device not found")]
    NotFound,

    /// 400 - the request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 401 - missing or invalid token.
    #[error("unauthorized")]
    Unauthorized,

    /// 403 - the token does not grant access.
    #[error("forbidden")]
    Forbidden,

    /// 429 - rate limited; the raw `Retry-After` header if present.
    #[error("too many requests")]
    TooManyRequests {
        /// Raw `Retry-After` header value.
        retry_after: Option<String>,
    },

    /// Any other HTTP or network failure.
    #[error("http error: {0}")]
    Http(String),

    /// The response body could not be decoded.
    #[error("invalid handshake response: {0}")]
    InvalidResponse(String),
}

/// Errors in the negotiation glue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The native media connection rejected an operation.
    #[error("media connection error: {0}")]
    Media(String),

    /// A negotiation payload could not be decoded.
    #[error("invalid negotiation message: {0}")]
    InvalidMessage(String),

    /// The signaling channel refused the message.
    #[error("signaling error: {0}")]
    Signaling(String),
}

/// Top-level signaling errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Security error.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// Handshake error.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Protocol error reported by or to the remote peer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection gave up reconnecting.
    #[error("reconnect attempts exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    /// The channel or connection is closed or failed.
    #[error("channel closed")]
    ChannelClosed,

    /// The connection driver is no longer running.
    #[error("connection shut down")]
    Shutdown,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
