//! Device identity tokens.
//!
//! A device authenticates to the handshake service with a short-lived JWS
//! signed by its Ed25519 identity key (`alg: EdDSA`). The header `kid` is the
//! base64url SHA-256 of the public key, so the verifier can pick the right key
//! without a registry lookup.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{SecurityError, DEVICE_TOKEN_SCOPE, DEVICE_TOKEN_TTL, RESOURCE_URN_PREFIX};

/// Resource URN naming one device of one product.
pub fn device_resource(product_id: &str, device_id: &str) -> String {
    format!("{RESOURCE_URN_PREFIX}:{product_id}:{device_id}")
}

/// Key id of an Ed25519 public key: base64url(SHA-256(key)).
pub fn key_id(key: &VerifyingKey) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()))
}

/// Claims of a device identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClaims {
    /// `urn:edge-signaling:{product}:{device}`.
    pub resource: String,
    /// Requested scope.
    pub scope: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Ed25519 identity key of a device. The secret half is zeroized on drop.
#[derive(Clone)]
pub struct DeviceKey {
    signing: SigningKey,
}

impl DeviceKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load a key from its 32 secret bytes.
    pub fn from_bytes(secret: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    /// Public half.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Key id announced in token headers.
    pub fn key_id(&self) -> String {
        key_id(&self.verifying_key())
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("kid", &self.key_id())
            .finish_non_exhaustive()
    }
}

/// Mints identity tokens for one device.
#[derive(Debug, Clone)]
pub struct DeviceTokenMinter {
    key: DeviceKey,
    resource: String,
    scope: String,
    ttl: Duration,
}

impl DeviceTokenMinter {
    /// Minter for `device_id` of `product_id`.
    pub fn new(key: DeviceKey, product_id: &str, device_id: &str) -> Self {
        Self {
            key,
            resource: device_resource(product_id, device_id),
            scope: DEVICE_TOKEN_SCOPE.to_string(),
            ttl: DEVICE_TOKEN_TTL,
        }
    }

    /// Override the token lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mint a token valid from now.
    pub fn mint(&self) -> Result<String, SecurityError> {
        self.mint_at(Utc::now().timestamp())
    }

    /// Mint a token issued at `iat` (seconds since the epoch).
    pub fn mint_at(&self, iat: i64) -> Result<String, SecurityError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.key.key_id());
        let claims = DeviceClaims {
            resource: self.resource.clone(),
            scope: self.scope.clone(),
            iat,
            exp: iat.saturating_add(self.ttl.as_secs() as i64),
        };

        let der = self
            .key
            .signing
            .to_pkcs8_der()
            .map_err(|e| SecurityError::Signing(e.to_string()))?;
        encode(&header, &claims, &EncodingKey::from_ed_der(der.as_bytes()))
            .map_err(|e| SecurityError::Signing(e.to_string()))
    }
}

/// Verifies device identity tokens against a set of known public keys.
#[derive(Debug, Default, Clone)]
pub struct DeviceTokenVerifier {
    keys: HashMap<String, VerifyingKey>,
}

impl DeviceTokenVerifier {
    /// Empty verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key`.
    pub fn add_key(&mut self, key: VerifyingKey) {
        self.keys.insert(key_id(&key), key);
    }

    /// Verify a token at the current time.
    pub fn verify(&self, token: &str) -> Result<DeviceClaims, SecurityError> {
        let key = self.decoding_key(token)?;
        decode::<DeviceClaims>(token, &key, &Self::validation())
            .map(|data| data.claims)
            .map_err(token_error)
    }

    /// Verify a token as of `now` (seconds since the epoch).
    pub fn verify_at(&self, token: &str, now: i64) -> Result<DeviceClaims, SecurityError> {
        let key = self.decoding_key(token)?;
        let mut validation = Self::validation();
        validation.validate_exp = false;
        let claims = decode::<DeviceClaims>(token, &key, &validation)
            .map_err(token_error)?
            .claims;
        if claims.exp < now {
            return Err(SecurityError::Verification("token expired".into()));
        }
        Ok(claims)
    }

    /// Key named by the token's `kid`.
    fn decoding_key(&self, token: &str) -> Result<DecodingKey, SecurityError> {
        let header = decode_header(token).map_err(token_error)?;
        let kid = header
            .kid
            .ok_or_else(|| SecurityError::Verification("token has no key id".into()))?;
        let key = self
            .keys
            .get(&kid)
            .ok_or_else(|| SecurityError::Verification(format!("unknown key id {kid}")))?;
        DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(key.as_bytes())).map_err(token_error)
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        validation
    }
}

fn token_error(e: jsonwebtoken::errors::Error) -> SecurityError {
    match e.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_) => SecurityError::Verification(e.to_string()),
        _ => SecurityError::Decode(e.to_string()),
    }
}
