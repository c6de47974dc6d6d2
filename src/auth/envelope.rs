use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AuthError;
use super::keys::Signature;

/// Label carried by the one-time public key announcement.
pub const PUBLIC_KEY_EXCHANGE_LABEL: &str = "PublicKeyExchange";
/// Label wrapping a [`SignedEnvelope`].
pub const SIGNED_DATA_LABEL: &str = "SignedData";

/// Base data-channel frame: `{label, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub label: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(label: impl Into<String>, payload: Value) -> Self {
        Self {
            label: label.into(),
            payload,
        }
    }

    /// Bytes covered by a signature. Signer and verifier both derive them
    /// from the parsed envelope, never from the raw frame.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, AuthError> {
        serde_json::to_vec(self).map_err(|e| AuthError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub message: Envelope,
    pub signature: Signature,
}
