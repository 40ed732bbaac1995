//! Signature-based ownership checks over secp256k1.
//!
//! Every check here returns `bool`: an invalid signature is an expected
//! outcome, not an error, and malformed scalars simply fail verification.

use crate::keys::{
    scalar_from_canonical, scalar_reduce, EcdsaSignature, MessageHash, PublicKey,
    SchnorrSignature,
};
use crate::types::{Bytes64, Hash};
use crate::utils::poseidon_hash_many;
use k256::elliptic_curve::point::AffineCoordinates;
use k256::elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const BIP340_CHALLENGE_TAG: &[u8] = b"BIP0340/challenge";

fn x_bytes(point: &AffinePoint) -> [u8; 32] {
    let mut x = [0u8; 32];
    x.copy_from_slice(&point.x());
    x
}

/// Verifies an ECDSA signature over `message_hash` for `public_key`.
///
/// `r` and `s` must be canonical, non-zero scalars. High-`s` signatures are
/// accepted.
#[must_use]
pub fn verify_ecdsa(
    message_hash: &MessageHash,
    signature: &EcdsaSignature,
    public_key: &PublicKey,
) -> bool {
    let (Some(r), Some(s)) = (
        scalar_from_canonical(&signature.r.0),
        scalar_from_canonical(&signature.s.0),
    ) else {
        return false;
    };
    if bool::from(r.is_zero()) || bool::from(s.is_zero()) {
        return false;
    }
    let Some(s_inv) = Option::<Scalar>::from(s.invert()) else {
        return false;
    };

    let z = message_hash.to_scalar();
    let u1 = z * s_inv;
    let u2 = r * s_inv;
    let point = (ProjectivePoint::GENERATOR * u1
        + ProjectivePoint::from(*public_key.as_affine()) * u2)
        .to_affine();
    if point == AffinePoint::IDENTITY {
        return false;
    }

    scalar_reduce(&x_bytes(&point)) == r
}

/// `SHA256(SHA256(tag) ‖ SHA256(tag) ‖ data)`.
#[must_use]
pub fn tagged_hash(tag: &[u8], data: &[&[u8]]) -> [u8; 32] {
    let tag_hash = Sha256::digest(tag);
    let mut hasher = Sha256::new();
    hasher.update(&tag_hash);
    hasher.update(&tag_hash);
    for chunk in data {
        hasher.update(chunk);
    }
    hasher.finalize().into()
}

/// BIP-340 challenge `int(taggedHash("BIP0340/challenge", r ‖ px ‖ m)) mod n`.
#[must_use]
pub fn bip340_challenge(r: &[u8; 32], px: &[u8; 32], message: &[u8]) -> Scalar {
    scalar_reduce(&tagged_hash(BIP340_CHALLENGE_TAG, &[r.as_slice(), px.as_slice(), message]))
}

/// Verifies a BIP-340 signature given its precomputed challenge.
///
/// Computes `R = s·G − e·P` and accepts iff `R` is finite, `R.x mod n`
/// equals the canonical scalar `r`, and `R.y` is even.
#[must_use]
pub fn verify_bip340(challenge: &Scalar, signature: &SchnorrSignature, public_key: &PublicKey) -> bool {
    let Some(s) = scalar_from_canonical(&signature.s.0) else {
        return false;
    };
    let nonce = (ProjectivePoint::GENERATOR * s
        - ProjectivePoint::from(*public_key.as_affine()) * challenge)
        .to_affine();
    if nonce == AffinePoint::IDENTITY {
        return false;
    }

    let Some(r) = scalar_from_canonical(&signature.r.0) else {
        return false;
    };
    let x_matches = scalar_reduce(&x_bytes(&nonce)) == r;
    let y_even = !bool::from(nonce.y_is_odd());
    x_matches && y_even
}

/// Convenience wrapper: derives the challenge for `message` and verifies.
#[must_use]
pub fn verify_bip340_message(
    message: &[u8],
    signature: &SchnorrSignature,
    public_key: &PublicKey,
) -> bool {
    let e = bip340_challenge(&signature.r.0, &public_key.x_bytes(), message);
    verify_bip340(&e, signature, public_key)
}

/// How the caller-supplied `(X‖Y)` bytes are compared to the verified point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBindingCheck {
    /// Compare the first and last byte of each coordinate only.
    Boundary,
    /// Compare all 64 bytes.
    #[default]
    Full,
}

const BOUNDARY_POSITIONS: [usize; 4] = [0, 31, 32, 63];

/// Checks that `encoded` is the 64-byte form of `public_key`.
#[must_use]
pub fn check_key_binding(encoded: &Bytes64, public_key: &PublicKey, mode: KeyBindingCheck) -> bool {
    let actual = public_key.to_bytes64();
    match mode {
        KeyBindingCheck::Full => actual == *encoded,
        KeyBindingCheck::Boundary => BOUNDARY_POSITIONS
            .iter()
            .all(|&i| actual.0[i] == encoded.0[i]),
    }
}

/// `H(messageHash)`: Poseidon over the two 128-bit limbs of the digest.
#[must_use]
pub fn message_binding_hash(message_hash: &MessageHash) -> Hash {
    Hash::from_field(poseidon_hash_many(message_hash.to_limbs()))
}
