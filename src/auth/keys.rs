use k256::FieldBytes;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use num_bigint::BigUint;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::AuthError;

const SCALAR_LEN: usize = 32;
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Local secp256k1 keypair.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; SCALAR_LEN];
        // rejection sampling: zero or >= n is not a valid scalar
        loop {
            rng.fill(&mut bytes);
            if let Ok(signing) = SigningKey::from_slice(&bytes) {
                return Self { signing };
            }
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.signing.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.signing.sign(message);
        let (r, s) = sig.split_bytes();
        Signature {
            r: BigUint::from_bytes_be(&r).to_string(),
            s: BigUint::from_bytes_be(&s).to_string(),
        }
    }
}

/// Public key as affine coordinates in decimal, the form exchanged on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub x: String,
    pub y: String,
}

impl PublicKey {
    fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let coord = |c: Option<&FieldBytes>| {
            c.map(|b| BigUint::from_bytes_be(b).to_string())
                .unwrap_or_default()
        };
        Self {
            x: coord(point.x()),
            y: coord(point.y()),
        }
    }

    pub(crate) fn to_verifying_key(&self) -> Result<VerifyingKey, AuthError> {
        let x = decimal_to_field(&self.x).map_err(AuthError::MalformedKey)?;
        let y = decimal_to_field(&self.y).map_err(AuthError::MalformedKey)?;

        let mut sec1 = Vec::with_capacity(1 + 2 * SCALAR_LEN);
        sec1.push(UNCOMPRESSED_TAG);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);

        VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|_| AuthError::MalformedKey("point is not on secp256k1".to_string()))
    }
}

/// ECDSA signature with `r` and `s` as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: String,
    pub s: String,
}

impl Signature {
    pub(crate) fn verify(&self, key: &VerifyingKey, message: &[u8]) -> Result<(), AuthError> {
        let r = decimal_to_field(&self.r).map_err(AuthError::MalformedSignature)?;
        let s = decimal_to_field(&self.s).map_err(AuthError::MalformedSignature)?;
        let sig = EcdsaSignature::from_scalars(
            FieldBytes::clone_from_slice(&r),
            FieldBytes::clone_from_slice(&s),
        )
        .map_err(|_| AuthError::InvalidSignature)?;
        key.verify(message, &sig)
            .map_err(|_| AuthError::InvalidSignature)
    }
}

/// Parse a decimal big integer into a 32-byte big-endian field element.
fn decimal_to_field(s: &str) -> Result<[u8; SCALAR_LEN], String> {
    let n: BigUint = s
        .parse()
        .map_err(|_| format!("not a decimal integer: {:?}", s))?;
    let bytes = n.to_bytes_be();
    if bytes.len() > SCALAR_LEN {
        return Err(format!("value exceeds {} bytes", SCALAR_LEN));
    }
    let mut out = [0u8; SCALAR_LEN];
    out[SCALAR_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_is_decimal_coordinates() {
        let key = KeyPair::generate().public_key();
        assert!(key.x.chars().all(|c| c.is_ascii_digit()));
        assert!(key.y.chars().all(|c| c.is_ascii_digit()));
        assert!(key.to_verifying_key().is_ok());
    }

    #[test]
    fn sign_and_verify() {
        let pair = KeyPair::generate();
        let vk = pair.public_key().to_verifying_key().unwrap();
        let sig = pair.sign(b"hello");
        assert!(sig.verify(&vk, b"hello").is_ok());
        assert!(matches!(
            sig.verify(&vk, b"hellp"),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn other_key_does_not_verify() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate().public_key().to_verifying_key().unwrap();
        let sig = pair.sign(b"hello");
        assert!(sig.verify(&other, b"hello").is_err());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let bad = PublicKey {
            x: "12ab".to_string(),
            y: "1".to_string(),
        };
        assert!(matches!(bad.to_verifying_key(), Err(AuthError::MalformedKey(_))));

        let off_curve = PublicKey {
            x: "1".to_string(),
            y: "1".to_string(),
        };
        assert!(matches!(off_curve.to_verifying_key(), Err(AuthError::MalformedKey(_))));

        let too_big = "9".repeat(100);
        assert!(decimal_to_field(&too_big).is_err());
    }

    #[test]
    fn decimal_round_trips_with_leading_zeros() {
        let field = decimal_to_field("255").unwrap();
        assert_eq!(field[31], 0xff);
        assert!(field[..31].iter().all(|b| *b == 0));
    }
}
