//! Shared value types: field hashes, fixed-size byte strings and predicate
//! outputs.

use crate::utils::{parse_decimal_u256, strip_hex_prefix};
use pasta_curves::group::ff::{Field, PrimeField};
use pasta_curves::pallas;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const HASH_SIZE: usize = 32;

/// Error returned when a string or byte encoding is not a canonical [`Hash`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid hash encoding: {0}")]
pub struct HashParseError(pub String);

/// A Pallas base-field element used for leaves, tree nodes, roots and slips.
///
/// The canonical byte form is the 32-byte little-endian field representation.
/// Decoding never reduces: any encoding of a value at or above the field
/// modulus is rejected, so every value has exactly one byte form.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Hash(pallas::Base);

impl Hash {
    /// Value of every leaf that was never written.
    pub const ZERO: Hash = Hash(<pallas::Base as Field>::ZERO);

    #[inline]
    #[must_use]
    pub fn from_field(value: pallas::Base) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub fn to_field(self) -> pallas::Base {
        self.0
    }

    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self(pallas::Base::from(value))
    }

    /// Canonical little-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HASH_SIZE] {
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(self.0.to_repr().as_ref());
        bytes
    }

    /// Decodes canonical little-endian bytes, rejecting values `>= p`.
    pub fn from_bytes(bytes: &[u8; HASH_SIZE]) -> Result<Self, HashParseError> {
        let mut repr = <pallas::Base as PrimeField>::Repr::default();
        repr.as_mut().copy_from_slice(bytes);
        Option::<pallas::Base>::from(pallas::Base::from_repr(repr))
            .map(Self)
            .ok_or_else(|| HashParseError("value is not below the field modulus".into()))
    }

    /// `0x`-prefixed hex of the canonical bytes.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    /// Accepts either `0x`-prefixed hex of the canonical bytes or an unsigned
    /// decimal integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            let stripped = strip_hex_prefix(trimmed);
            if stripped.len() != HASH_SIZE * 2 {
                return Err(HashParseError(format!(
                    "expected {} hex characters, got {}",
                    HASH_SIZE * 2,
                    stripped.len()
                )));
            }
            let bytes = hex::decode(stripped).map_err(|e| HashParseError(e.to_string()))?;
            let mut arr = [0u8; HASH_SIZE];
            arr.copy_from_slice(&bytes);
            return Self::from_bytes(&arr);
        }

        let mut be = parse_decimal_u256(trimmed)
            .ok_or_else(|| HashParseError(format!("'{trimmed}' is not a decimal integer")))?;
        be.reverse();
        Self::from_bytes(&be)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl From<pallas::Base> for Hash {
    fn from(value: pallas::Base) -> Self {
        Self(value)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fixed-size byte string, e.g. the 64-byte `(X‖Y)` public key encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedBytes<const N: usize>(pub [u8; N]);

pub type Bytes64 = FixedBytes<64>;

impl<const N: usize> FixedBytes<N> {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; N]>::try_from(bytes).ok().map(Self)
    }

    pub fn from_hex(input: &str) -> Result<Self, HashParseError> {
        let stripped = strip_hex_prefix(input);
        let bytes = hex::decode(stripped).map_err(|e| HashParseError(e.to_string()))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| HashParseError(format!("expected {N} bytes, got {}", bytes.len())))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl<const N: usize> fmt::Debug for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedBytes<{N}>({})", self.to_hex())
    }
}

impl<const N: usize> Serialize for FixedBytes<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedBytes<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Structured result of the ownership + membership predicate.
///
/// The two flags are kept separate; callers decide how partial satisfaction
/// is treated (a tally usually requires both).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateOutput {
    pub verified_ownership: bool,
    pub verified_membership: bool,
    /// `H(messageHash)`; lets a verifier check which message the assertion
    /// vouches for.
    pub bound_message_hash: Hash,
}

impl PredicateOutput {
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.verified_ownership && self.verified_membership
    }
}

/// Predicate output for a slip-bound (voting) submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutput {
    #[serde(flatten)]
    pub predicate: PredicateOutput,
    /// Oracle signature valid and `slip_id` re-derived from the voter identity.
    pub verified_slip: bool,
    pub slip_id: Hash,
}

impl VoteOutput {
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.predicate.is_satisfied() && self.verified_slip
    }
}
