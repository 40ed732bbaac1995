//! Anti-replay slips issued by a trusted oracle.
//!
//! A slip ties a voter identity to one context (a proposal) without revealing
//! the identity: `slip_id = H(H(identity), secret, context)`, where `secret`
//! is known only to the oracle. The oracle signs the canonical bytes of
//! `slip_id` with BIP-340, so anyone holding the oracle's public key can
//! check a slip; checking the identity binding requires the secret and is
//! done next to the predicate evaluator.

use crate::error::OracleError;
use crate::ethereum::{eip191_hash, keccak256};
use crate::identity::IdentityMode;
use crate::keys::{PublicKey, SchnorrSignature};
use crate::ownership::verify_bip340_message;
use crate::types::Hash;
use crate::utils::{decode_hex_array, poseidon_hash_many, strip_hex_prefix, u256_to_limbs};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Oracle-only secret mixed into every slip id.
#[derive(Clone, PartialEq, Eq)]
pub struct OracleSecret(Hash);

impl OracleSecret {
    #[must_use]
    pub fn new(value: Hash) -> Self {
        Self(value)
    }

    /// Parses a decimal or `0x`-hex field element.
    pub fn parse(input: &str) -> Result<Self, OracleError> {
        input
            .parse()
            .map(Self)
            .map_err(|e| OracleError::InvalidEncoding(format!("oracle secret: {e}")))
    }

    #[must_use]
    pub fn as_hash(&self) -> Hash {
        self.0
    }
}

impl fmt::Debug for OracleSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OracleSecret(..)")
    }
}

/// Context a slip is valid for, typically one proposal of one space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlipContext(pub Hash);

impl SlipContext {
    /// The string a voter signs to request a slip.
    #[must_use]
    pub fn proposal_message(space: &str, proposal_id: &str) -> String {
        format!("{space}/proposal/{proposal_id}")
    }

    /// Context of `"<space>/proposal/<proposal_id>"`: Poseidon over the
    /// 128-bit limbs of its Keccak-256 digest.
    #[must_use]
    pub fn proposal(space: &str, proposal_id: &str) -> Self {
        let digest = keccak256(Self::proposal_message(space, proposal_id).as_bytes());
        Self(Hash::from_field(poseidon_hash_many(u256_to_limbs(&digest))))
    }
}

/// BIP-340 signing key of the oracle.
pub struct OracleKey {
    signing_key: k256::schnorr::SigningKey,
}

impl OracleKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, OracleError> {
        k256::schnorr::SigningKey::from_bytes(bytes)
            .map(|signing_key| Self { signing_key })
            .map_err(|e| OracleError::InvalidEncoding(format!("oracle private key: {e}")))
    }

    pub fn from_hex(input: &str) -> Result<Self, OracleError> {
        let bytes: [u8; 32] = decode_hex_array(input)
            .map_err(|e| OracleError::InvalidEncoding(format!("oracle private key: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Even-`y` public point, as BIP-340 verifiers see it.
    pub fn public_key(&self) -> Result<PublicKey, OracleError> {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.signing_key.verifying_key().to_bytes());
        PublicKey::from_x_only(&x)
            .ok_or_else(|| OracleError::Signing("oracle key has no even-y lift".into()))
    }

    fn sign(&self, message: &[u8]) -> Result<SchnorrSignature, OracleError> {
        let aux_rand = [0u8; 32];
        self.signing_key
            .sign_raw(message, &aux_rand)
            .map(SchnorrSignature::from)
            .map_err(|e| OracleError::Signing(e.to_string()))
    }
}

impl fmt::Debug for OracleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OracleKey(..)")
    }
}

/// Oracle-signed slip; also its JSON wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slip {
    pub slip_id: Hash,
    pub oracle_signature: SchnorrSignature,
    pub oracle_public_key: PublicKey,
}

/// `H(H(identity), secret, context)`.
#[must_use]
pub fn derive_slip_id(identity: Hash, secret: &OracleSecret, context: &SlipContext) -> Hash {
    let inner = poseidon_hash_many([identity.to_field()]);
    Hash::from_field(poseidon_hash_many([
        inner,
        secret.as_hash().to_field(),
        context.0.to_field(),
    ]))
}

/// Derives the slip id and signs it. Deterministic for a given
/// `(identity, secret, context)` and key.
pub fn issue_slip(
    identity: Hash,
    secret: &OracleSecret,
    context: &SlipContext,
    oracle_key: &OracleKey,
) -> Result<Slip, OracleError> {
    let slip_id = derive_slip_id(identity, secret, context);
    let oracle_signature = oracle_key.sign(&slip_id.to_bytes())?;
    let oracle_public_key = oracle_key.public_key()?;
    info!("Issued slip {slip_id} for context {}", context.0);
    Ok(Slip {
        slip_id,
        oracle_signature,
        oracle_public_key,
    })
}

/// Checks the oracle signature over `slip_id` against `trusted_key`.
///
/// A slip naming a different oracle key is rejected even if its signature
/// matches that key.
#[must_use]
pub fn verify_slip(slip: &Slip, trusted_key: &PublicKey) -> bool {
    if slip.oracle_public_key.x_bytes() != trusted_key.x_bytes() {
        debug!("Slip names an untrusted oracle key");
        return false;
    }
    verify_bip340_message(&slip.slip_id.to_bytes(), &slip.oracle_signature, trusted_key)
}

/// Re-derives `slip_id` from the identity; needs the oracle secret.
#[must_use]
pub fn verify_slip_binding(
    slip: &Slip,
    identity: Hash,
    secret: &OracleSecret,
    context: &SlipContext,
) -> bool {
    slip.slip_id == derive_slip_id(identity, secret, context)
}

/// Recovers the public key behind an Ethereum `personal_sign` signature.
///
/// `signature` is the 65-byte `r ‖ s ‖ v` form, with `v` in `{0, 1, 27, 28}`.
pub fn recover_signer(message: &[u8], signature: &[u8]) -> Result<PublicKey, OracleError> {
    if signature.len() != 65 {
        return Err(OracleError::InvalidEncoding(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| OracleError::InvalidEncoding(format!("signature: {e}")))?;
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        v => {
            return Err(OracleError::InvalidEncoding(format!(
                "unsupported recovery byte {v}"
            )))
        }
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| OracleError::InvalidEncoding(format!("recovery byte {v}")))?;

    let prehash = eip191_hash(message);
    let key = VerifyingKey::recover_from_prehash(prehash.as_bytes(), &sig, recovery_id)
        .map_err(|e| OracleError::Recovery(e.to_string()))?;
    Ok(PublicKey::from_verifying_key(&key))
}

/// A voter's request for a slip: a `personal_sign` signature over
/// `"<space>/proposal/<proposal>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlipRequest {
    pub signature: String,
    pub space: String,
    pub proposal: String,
}

/// Recovers the voter from `request` and issues their slip for the proposal.
///
/// `mode` must be the identity derivation the club tree and the vote
/// evaluator use, or the slip will never bind.
pub fn handle_request(
    request: &SlipRequest,
    mode: IdentityMode,
    secret: &OracleSecret,
    oracle_key: &OracleKey,
) -> Result<Slip, OracleError> {
    let signature = hex::decode(strip_hex_prefix(&request.signature))
        .map_err(|e| OracleError::InvalidEncoding(format!("signature hex: {e}")))?;
    let message = SlipContext::proposal_message(&request.space, &request.proposal);
    let voter = recover_signer(message.as_bytes(), &signature)?;
    debug!("Recovered slip requester key {}", voter.to_hex());

    let context = SlipContext::proposal(&request.space, &request.proposal);
    issue_slip(mode.derive(&voter), secret, &context, oracle_key)
}
