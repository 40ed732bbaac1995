//! secp256k1 key and signature types shared by the ownership checks and the
//! slip oracle.

use crate::error::PredicateError;
use crate::types::{Bytes64, FixedBytes};
use crate::utils::{strip_hex_prefix, u256_to_limbs};
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, EncodedPoint, FieldBytes, Scalar, U256};
use pasta_curves::pallas;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Decodes a big-endian 32-byte value as a canonical secp256k1 scalar.
/// Values `>= n` are rejected rather than reduced.
pub(crate) fn scalar_from_canonical(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_repr(FieldBytes::clone_from_slice(bytes)))
}

/// Reduces a big-endian 32-byte value modulo the group order.
pub(crate) fn scalar_reduce(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::clone_from_slice(bytes))
}

/// A validated secp256k1 point (never the identity).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(AffinePoint);

impl PublicKey {
    /// Builds a key from big-endian affine coordinates; `None` if the point
    /// is not on the curve.
    pub fn from_coordinates(x: &[u8; 32], y: &[u8; 32]) -> Option<Self> {
        let encoded = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(x),
            FieldBytes::from_slice(y),
            false,
        );
        Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded)).map(Self)
    }

    /// Decodes the 64-byte `(X‖Y)` form.
    pub fn from_bytes64(bytes: &Bytes64) -> Result<Self, PredicateError> {
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&bytes.0[..32]);
        y.copy_from_slice(&bytes.0[32..]);
        Self::from_coordinates(&x, &y).ok_or_else(|| {
            PredicateError::InvalidEncoding("public key is not a point on secp256k1".into())
        })
    }

    /// Lifts an x-only (BIP-340) key to the point with even `y`.
    pub fn from_x_only(x: &[u8; 32]) -> Option<Self> {
        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(x);
        let encoded = EncodedPoint::from_bytes(compressed).ok()?;
        Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded)).map(Self)
    }

    /// Parses hex in any of the 64-byte raw, 65-byte uncompressed SEC1 or
    /// 33-byte compressed SEC1 forms.
    pub fn from_hex(input: &str) -> Result<Self, PredicateError> {
        let bytes = hex::decode(strip_hex_prefix(input))
            .map_err(|e| PredicateError::InvalidEncoding(format!("public key hex: {e}")))?;
        match bytes.len() {
            64 => Bytes64::from_slice(&bytes)
                .ok_or_else(|| PredicateError::InvalidEncoding("public key length".into()))
                .and_then(|b| Self::from_bytes64(&b)),
            33 | 65 => {
                let encoded = EncodedPoint::from_bytes(&bytes)
                    .map_err(|e| PredicateError::InvalidEncoding(format!("public key: {e}")))?;
                Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
                    .map(Self)
                    .ok_or_else(|| {
                        PredicateError::InvalidEncoding(
                            "public key is not a point on secp256k1".into(),
                        )
                    })
            }
            n => Err(PredicateError::InvalidEncoding(format!(
                "public key must be 33, 64 or 65 bytes, got {n}"
            ))),
        }
    }

    /// Public key of a signing key.
    #[must_use]
    pub fn from_signing_key(key: &SigningKey) -> Self {
        Self::from_verifying_key(key.verifying_key())
    }

    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(*key.as_affine())
    }

    #[must_use]
    pub fn as_affine(&self) -> &AffinePoint {
        &self.0
    }

    /// The 64-byte big-endian `(X‖Y)` form.
    #[must_use]
    pub fn to_bytes64(&self) -> Bytes64 {
        let encoded = self.0.to_encoded_point(false);
        let mut out = [0u8; 64];
        // Uncompressed SEC1: 0x04 ‖ X ‖ Y
        out.copy_from_slice(&encoded.as_bytes()[1..65]);
        FixedBytes(out)
    }

    #[must_use]
    pub fn x_bytes(&self) -> [u8; 32] {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.to_bytes64().0[..32]);
        x
    }

    #[must_use]
    pub fn y_bytes(&self) -> [u8; 32] {
        let mut y = [0u8; 32];
        y.copy_from_slice(&self.to_bytes64().0[32..]);
        y
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        self.to_bytes64().to_hex()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    Ecdsa,
    Bip340,
}

/// ECDSA `(r, s)` as big-endian 32-byte scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature {
    pub r: FixedBytes<32>,
    pub s: FixedBytes<32>,
}

impl EcdsaSignature {
    #[must_use]
    pub fn new(r: [u8; 32], s: [u8; 32]) -> Self {
        Self {
            r: FixedBytes(r),
            s: FixedBytes(s),
        }
    }

    /// Takes `r ‖ s` from a 64-byte compact or 65-byte `r ‖ s ‖ v` encoding.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PredicateError> {
        if bytes.len() != 64 && bytes.len() != 65 {
            return Err(PredicateError::InvalidEncoding(format!(
                "ECDSA signature must be 64 or 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self::new(r, s))
    }
}

impl From<k256::ecdsa::Signature> for EcdsaSignature {
    fn from(sig: k256::ecdsa::Signature) -> Self {
        let (r, s) = sig.split_bytes();
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&r);
        s_bytes.copy_from_slice(&s);
        Self::new(r_bytes, s_bytes)
    }
}

/// BIP-340 `(r, s)`: `r` is the x-coordinate of the nonce point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrSignature {
    pub r: FixedBytes<32>,
    pub s: FixedBytes<32>,
}

impl SchnorrSignature {
    #[must_use]
    pub fn new(r: [u8; 32], s: [u8; 32]) -> Self {
        Self {
            r: FixedBytes(r),
            s: FixedBytes(s),
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Self::new(r, s)
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r.0);
        out[32..].copy_from_slice(&self.s.0);
        out
    }
}

impl From<k256::schnorr::Signature> for SchnorrSignature {
    fn from(sig: k256::schnorr::Signature) -> Self {
        Self::from_bytes(&sig.to_bytes())
    }
}

/// Scheme-tagged signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum Signature {
    Ecdsa(EcdsaSignature),
    Bip340(SchnorrSignature),
}

impl Signature {
    #[must_use]
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Signature::Ecdsa(_) => SignatureScheme::Ecdsa,
            Signature::Bip340(_) => SignatureScheme::Bip340,
        }
    }
}

/// A 32-byte big-endian message digest, used as the signed scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHash(pub FixedBytes<32>);

impl MessageHash {
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(FixedBytes(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }

    /// Digest reduced into the scalar field, as ECDSA uses it.
    #[must_use]
    pub fn to_scalar(&self) -> Scalar {
        scalar_reduce(self.as_bytes())
    }

    /// `[high, low]` 128-bit limbs as Pallas field elements.
    #[must_use]
    pub fn to_limbs(&self) -> [pallas::Base; 2] {
        u256_to_limbs(self.as_bytes())
    }

    pub fn from_hex(input: &str) -> Result<Self, PredicateError> {
        FixedBytes::<32>::from_hex(input)
            .map(Self)
            .map_err(|e| PredicateError::InvalidEncoding(e.to_string()))
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// Parses a hex-encoded secp256k1 private key.
pub fn parse_signing_key(input: &str) -> anyhow::Result<SigningKey> {
    let bytes: [u8; 32] = crate::utils::decode_hex_array(input)?;
    SigningKey::from_bytes(&FieldBytes::from(bytes))
        .map_err(|_| anyhow::anyhow!("Private key is not a valid secp256k1 scalar"))
}
