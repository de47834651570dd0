//! Per-channel message signing and verification.
//!
//! The JWT signer implements a mutual-nonce replay guard on top of HS256:
//!
//! ```text
//! client                                   device
//!   | seq=0 signerNonce=A                     |   latch remote=A
//!   |---------------------------------------->|
//!   |   seq=0 signerNonce=B verifierNonce=A   |
//!   |<----------------------------------------|   latch remote=B
//!   | seq=1 signerNonce=A verifierNonce=B     |
//!   |---------------------------------------->|
//! ```
//!
//! Sequence numbers are strict (no gaps, no replays) and a restarted remote
//! session shows up as a different nonce. Every failure is fatal for the
//! channel; a desynchronized session is never repaired.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::envelope::SecurityFrame;
use crate::core::SecurityError;

/// Signs outbound and verifies inbound messages of one channel.
pub trait MessageSigner: Send + fmt::Debug {
    /// Wrap an application message in an envelope.
    fn sign(&mut self, message: Value) -> Result<SecurityFrame, SecurityError>;

    /// Check an envelope and return the application message.
    fn verify(&mut self, frame: SecurityFrame) -> Result<Value, SecurityError>;
}

/// How a connection signs the messages of its channels.
#[derive(Clone, Default)]
pub enum SigningConfig {
    /// Unsigned envelopes. Only for trusted links and testing.
    #[default]
    None,

    /// HS256 JWTs with a secret shared by both peers.
    SharedSecret {
        /// Shared secret. Zeroized on drop.
        secret: Zeroizing<Vec<u8>>,
        /// Optional `kid` header value.
        key_id: Option<String>,
    },
}

impl SigningConfig {
    /// Shared-secret signing without a key id.
    pub fn shared_secret(secret: impl Into<Vec<u8>>) -> Self {
        Self::SharedSecret {
            secret: Zeroizing::new(secret.into()),
            key_id: None,
        }
    }

    /// Shared-secret signing announcing `key_id` in the JWT header.
    pub fn shared_secret_with_key_id(secret: impl Into<Vec<u8>>, key_id: impl Into<String>) -> Self {
        Self::SharedSecret {
            secret: Zeroizing::new(secret.into()),
            key_id: Some(key_id.into()),
        }
    }

    /// Fresh signer for a new channel.
    pub fn signer(&self) -> Box<dyn MessageSigner> {
        match self {
            Self::None => Box::new(NoneSigner),
            Self::SharedSecret { secret, key_id } => {
                Box::new(JwtSigner::new(secret.to_vec(), key_id.clone()))
            }
        }
    }
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::SharedSecret { key_id, .. } => f
                .debug_struct("SharedSecret")
                .field("secret", &"<redacted>")
                .field("key_id", key_id)
                .finish(),
        }
    }
}

/// Pass-through signer for `NONE` envelopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneSigner;

impl MessageSigner for NoneSigner {
    fn sign(&mut self, message: Value) -> Result<SecurityFrame, SecurityError> {
        Ok(SecurityFrame::Unsigned { message })
    }

    fn verify(&mut self, frame: SecurityFrame) -> Result<Value, SecurityError> {
        match frame {
            SecurityFrame::Unsigned { message } => Ok(message),
            other => Err(SecurityError::Verification(format!(
                "expected NONE envelope, got {}",
                other.kind()
            ))),
        }
    }
}

/// Claims of a signed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageClaims {
    /// The application message.
    pub message: Value,
    /// Signer's send counter.
    pub message_seq: u64,
    /// Signer's session nonce.
    pub signer_nonce: String,
    /// Verifier's session nonce, once the signer has learned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_nonce: Option<String>,
}

/// HS256 signer with the mutual-nonce replay guard.
pub struct JwtSigner {
    secret: Zeroizing<Vec<u8>>,
    key_id: Option<String>,
    /// Our session nonce, created on first send.
    nonce: Option<String>,
    send_seq: u64,
    recv_seq: u64,
    /// Latched on the first verified inbound message.
    remote_nonce: Option<String>,
}

impl fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSigner")
            .field("key_id", &self.key_id)
            .field("nonce", &self.nonce)
            .field("send_seq", &self.send_seq)
            .field("recv_seq", &self.recv_seq)
            .field("remote_nonce", &self.remote_nonce)
            .finish_non_exhaustive()
    }
}

impl JwtSigner {
    /// Create a signer for one session.
    pub fn new(secret: impl Into<Vec<u8>>, key_id: Option<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            key_id,
            nonce: None,
            send_seq: 0,
            recv_seq: 0,
            remote_nonce: None,
        }
    }

    /// Our session nonce, if we have sent anything yet.
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// The latched remote nonce.
    pub fn remote_nonce(&self) -> Option<&str> {
        self.remote_nonce.as_deref()
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation
    }

    fn check_claims(&self, claims: &MessageClaims) -> Result<(), SecurityError> {
        if claims.message_seq != self.recv_seq {
            return Err(SecurityError::Verification(format!(
                "expected messageSeq {}, got {}",
                self.recv_seq, claims.message_seq
            )));
        }

        if let Some(remote) = &self.remote_nonce {
            if &claims.signer_nonce != remote {
                return Err(SecurityError::Verification("signerNonce changed".into()));
            }
            if claims.verifier_nonce.is_none() {
                return Err(SecurityError::Verification("missing verifierNonce".into()));
            }
        }

        // An echoed nonce must be ours, on the first message as on every later one.
        if let Some(echoed) = &claims.verifier_nonce {
            if self.nonce.as_deref() != Some(echoed.as_str()) {
                return Err(SecurityError::Verification("verifierNonce mismatch".into()));
            }
        }

        Ok(())
    }
}

impl MessageSigner for JwtSigner {
    fn sign(&mut self, message: Value) -> Result<SecurityFrame, SecurityError> {
        if self.send_seq > 0 && self.remote_nonce.is_none() {
            return Err(SecurityError::RemoteNonceUnknown { seq: self.send_seq });
        }

        let signer_nonce = self
            .nonce
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let claims = MessageClaims {
            message,
            message_seq: self.send_seq,
            signer_nonce,
            verifier_nonce: self.remote_nonce.clone(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.key_id.clone();
        let jwt = encode(&header, &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| SecurityError::Signing(e.to_string()))?;

        self.send_seq += 1;
        Ok(SecurityFrame::Jwt { jwt })
    }

    fn verify(&mut self, frame: SecurityFrame) -> Result<Value, SecurityError> {
        let jwt = match frame {
            SecurityFrame::Jwt { jwt } => jwt,
            other => {
                return Err(SecurityError::Verification(format!(
                    "expected JWT envelope, got {}",
                    other.kind()
                )))
            }
        };

        let data = decode::<MessageClaims>(
            &jwt,
            &DecodingKey::from_secret(&self.secret),
            &Self::validation(),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                SecurityError::Verification(e.to_string())
            }
            _ => SecurityError::Decode(e.to_string()),
        })?;
        let claims = data.claims;

        self.check_claims(&claims)?;

        if self.remote_nonce.is_none() {
            debug!(nonce = %claims.signer_nonce, "latched remote nonce");
            self.remote_nonce = Some(claims.signer_nonce);
        }
        self.recv_seq += 1;
        Ok(claims.message)
    }
}
