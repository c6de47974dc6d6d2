//! Key exchange and signed messages for a two-party session
//!
//! Each session owns one secp256k1 keypair. Once the data channel opens the
//! public key is announced under [`PUBLIC_KEY_EXCHANGE_LABEL`]; the first key
//! received becomes the only counterpart. Signed frames are verified against
//! it and dropped if it is missing or the signature does not match.

mod envelope;
mod keys;

pub use envelope::{Envelope, PUBLIC_KEY_EXCHANGE_LABEL, SIGNED_DATA_LABEL, SignedEnvelope};
pub use keys::{KeyPair, PublicKey, Signature};

use k256::ecdsa::VerifyingKey;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("a counterpart key is already registered")]
    CounterpartAlreadyRegistered,

    #[error("no counterpart key registered")]
    CounterpartMissing,

    #[error("signature does not verify")]
    InvalidSignature,

    #[error("malformed public key: {0}")]
    MalformedKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::CounterpartAlreadyRegistered => ErrorKind::Resource,
            AuthError::CounterpartMissing
            | AuthError::InvalidSignature
            | AuthError::MalformedKey(_)
            | AuthError::MalformedSignature(_)
            | AuthError::Serialization(_) => ErrorKind::Validation,
        }
    }
}

/// Local keypair plus the single remote key of a two-party session.
pub struct KeyExchange {
    local: KeyPair,
    counterpart: Option<VerifyingKey>,
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchange {
    pub fn new() -> Self {
        Self::with_keypair(KeyPair::generate())
    }

    pub fn with_keypair(local: KeyPair) -> Self {
        Self {
            local,
            counterpart: None,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.local.public_key()
    }

    pub fn has_counterpart(&self) -> bool {
        self.counterpart.is_some()
    }

    /// Register the remote key. A second registration is refused, the
    /// first key stays in place.
    pub fn register_counterpart(&mut self, key: &PublicKey) -> Result<(), AuthError> {
        if self.counterpart.is_some() {
            return Err(AuthError::CounterpartAlreadyRegistered);
        }
        self.counterpart = Some(key.to_verifying_key()?);
        info!("Registered counterpart public key");
        Ok(())
    }

    pub fn sign(&self, label: impl Into<String>, payload: Value) -> Result<SignedEnvelope, AuthError> {
        let message = Envelope::new(label, payload);
        let signature = self.local.sign(&message.canonical_bytes()?);
        Ok(SignedEnvelope { message, signature })
    }

    pub fn verify(&self, signed: &SignedEnvelope) -> Result<(), AuthError> {
        let key = self.counterpart.as_ref().ok_or(AuthError::CounterpartMissing)?;
        signed
            .signature
            .verify(key, &signed.message.canonical_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paired() -> (KeyExchange, KeyExchange) {
        let mut a = KeyExchange::new();
        let mut b = KeyExchange::new();
        let (a_pub, b_pub) = (a.public_key(), b.public_key());
        a.register_counterpart(&b_pub).unwrap();
        b.register_counterpart(&a_pub).unwrap();
        (a, b)
    }

    #[test]
    fn signed_message_verifies_at_counterpart() {
        let (a, b) = paired();
        let signed = a.sign("move", json!({"cell": 4})).unwrap();
        assert!(b.verify(&signed).is_ok());
    }

    #[test]
    fn verification_needs_a_counterpart() {
        let a = KeyExchange::new();
        let b = KeyExchange::new();
        let signed = a.sign("move", json!(1)).unwrap();
        assert!(matches!(b.verify(&signed), Err(AuthError::CounterpartMissing)));
    }

    #[test]
    fn second_registration_is_a_resource_error() {
        let mut a = KeyExchange::new();
        let first = KeyExchange::new().public_key();
        let second = KeyExchange::new().public_key();
        a.register_counterpart(&first).unwrap();

        let err = a.register_counterpart(&second).unwrap_err();
        assert!(matches!(err, AuthError::CounterpartAlreadyRegistered));
        assert_eq!(err.kind(), ErrorKind::Resource);

        // still bound to the first key
        let signer = KeyExchange::new();
        assert!(a.verify(&signer.sign("x", json!(null)).unwrap()).is_err());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (a, b) = paired();
        let mut signed = a.sign("move", json!({"cell": 4})).unwrap();
        let last = signed.signature.r.pop().unwrap();
        signed
            .signature
            .r
            .push(if last == '0' { '1' } else { '0' });
        assert!(b.verify(&signed).is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let (a, b) = paired();
        let mut signed = a.sign("move", json!({"cell": 4})).unwrap();
        signed.message.payload = json!({"cell": 5});
        assert!(matches!(b.verify(&signed), Err(AuthError::InvalidSignature)));
    }
}
