//! The ownership + membership predicate.
//!
//! Everything here is a pure function of its inputs. A proof system that
//! wants to attest to the predicate wraps these functions through
//! [`ProofEngine`]; it does not change how they are evaluated.
//!
//! Outcomes are split in two:
//! - `Err(PredicateError)` for malformed or inconsistent input (bad
//!   encodings, an out-of-range index, a key or message binding mismatch)
//! - `Ok(output)` with `false` flags for well-formed but unauthorized input
//!   (bad signature, not a member)

use crate::error::{AccumulatorError, PredicateError};
use crate::identity::IdentityMode;
use crate::keys::{MessageHash, PublicKey, Signature};
use crate::merkle::{fold_path, index_in_range, MerkleProof, MerkleProofJson, TREE_DEPTH};
use crate::oracle::{verify_slip, verify_slip_binding, OracleSecret, Slip, SlipContext};
use crate::ownership::{
    bip340_challenge, check_key_binding, message_binding_hash, verify_bip340, verify_ecdsa,
    KeyBindingCheck,
};
use crate::types::{Bytes64, Hash, PredicateOutput, VoteOutput};
use log::debug;
use serde::{Deserialize, Serialize};

/// Knobs of the predicate. The tree builder must use the same
/// `identity_mode` as the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PredicateConfig {
    pub identity_mode: IdentityMode,
    pub key_check: KeyBindingCheck,
}

/// Combines an ownership result with a membership check.
///
/// Membership folds `proof.siblings` onto `identity_hash` along
/// `claimed_index` (not `proof.index`) and compares with `merkle_root`.
///
/// # Errors
///
/// - [`PredicateError::IndexOutOfRange`] if `claimed_index` is outside the tree
/// - [`PredicateError::MessageBindingMismatch`] if `H(message_hash)` differs
///   from `message_hash_hash`
pub fn combine<const DEPTH: usize>(
    merkle_root: Hash,
    proof: &MerkleProof<DEPTH>,
    claimed_index: u64,
    identity_hash: Hash,
    ownership: bool,
    message_hash: &MessageHash,
    message_hash_hash: Hash,
) -> Result<PredicateOutput, PredicateError> {
    if !index_in_range(claimed_index, DEPTH) {
        return Err(PredicateError::IndexOutOfRange {
            index: claimed_index,
            depth: DEPTH,
        });
    }

    let bound_message_hash = message_binding_hash(message_hash);
    if bound_message_hash != message_hash_hash {
        return Err(PredicateError::MessageBindingMismatch);
    }

    let verified_membership = fold_path(identity_hash, claimed_index, &proof.siblings) == merkle_root;
    debug!(
        "Predicate: ownership={ownership} membership={verified_membership} index={claimed_index}"
    );

    Ok(PredicateOutput {
        verified_ownership: ownership,
        verified_membership,
        bound_message_hash,
    })
}

/// All inputs of one ownership + membership assertion.
///
/// `merkle_root` is the root the verifier trusts, not the one embedded in
/// `proof`.
#[derive(Debug, Clone)]
pub struct Statement<const DEPTH: usize = TREE_DEPTH> {
    pub merkle_root: Hash,
    pub proof: MerkleProof<DEPTH>,
    pub claimed_index: u64,
    pub message_hash: MessageHash,
    pub message_hash_hash: Hash,
    pub signature: Signature,
    pub public_key: PublicKey,
    /// Caller-supplied `(X‖Y)` encoding, checked against `public_key`.
    pub public_key_bytes: Bytes64,
}

fn verify_ownership(signature: &Signature, message_hash: &MessageHash, public_key: &PublicKey) -> bool {
    match signature {
        Signature::Ecdsa(sig) => verify_ecdsa(message_hash, sig, public_key),
        Signature::Bip340(sig) => {
            let e = bip340_challenge(&sig.r.0, &public_key.x_bytes(), message_hash.as_bytes());
            verify_bip340(&e, sig, public_key)
        }
    }
}

/// Evaluates a statement under `config`.
pub fn evaluate<const DEPTH: usize>(
    statement: &Statement<DEPTH>,
    config: &PredicateConfig,
) -> Result<PredicateOutput, PredicateError> {
    if !check_key_binding(&statement.public_key_bytes, &statement.public_key, config.key_check) {
        return Err(PredicateError::KeyBindingMismatch);
    }

    let identity_hash = config.identity_mode.derive(&statement.public_key);
    let ownership = verify_ownership(
        &statement.signature,
        &statement.message_hash,
        &statement.public_key,
    );

    combine(
        statement.merkle_root,
        &statement.proof,
        statement.claimed_index,
        identity_hash,
        ownership,
        &statement.message_hash,
        statement.message_hash_hash,
    )
}

fn require_scheme(statement_sig: &Signature, ecdsa: bool) -> Result<(), PredicateError> {
    match (statement_sig, ecdsa) {
        (Signature::Ecdsa(_), true) | (Signature::Bip340(_), false) => Ok(()),
        _ => Err(PredicateError::InvalidEncoding(format!(
            "unexpected {:?} signature",
            statement_sig.scheme()
        ))),
    }
}

/// Ethereum flavour: ECDSA signature, address-style identity.
pub fn evaluate_ecdsa<const DEPTH: usize>(
    statement: &Statement<DEPTH>,
    key_check: KeyBindingCheck,
) -> Result<PredicateOutput, PredicateError> {
    require_scheme(&statement.signature, true)?;
    evaluate(
        statement,
        &PredicateConfig {
            identity_mode: IdentityMode::Address,
            key_check,
        },
    )
}

/// Nostr flavour: BIP-340 signature, raw-key identity.
pub fn evaluate_bip340<const DEPTH: usize>(
    statement: &Statement<DEPTH>,
    key_check: KeyBindingCheck,
) -> Result<PredicateOutput, PredicateError> {
    require_scheme(&statement.signature, false)?;
    evaluate(
        statement,
        &PredicateConfig {
            identity_mode: IdentityMode::RawKey,
            key_check,
        },
    )
}

/// Slip inputs of a vote. Held by the evaluator, next to the oracle secret.
#[derive(Debug, Clone)]
pub struct SlipWitness {
    pub slip: Slip,
    pub trusted_oracle_key: PublicKey,
    pub secret: OracleSecret,
    pub context: SlipContext,
}

/// Ownership + membership plus a slip bound to the voter's identity.
pub fn evaluate_vote<const DEPTH: usize>(
    statement: &Statement<DEPTH>,
    config: &PredicateConfig,
    witness: &SlipWitness,
) -> Result<VoteOutput, PredicateError> {
    let predicate = evaluate(statement, config)?;
    let identity_hash = config.identity_mode.derive(&statement.public_key);

    let signed = verify_slip(&witness.slip, &witness.trusted_oracle_key);
    let bound = verify_slip_binding(&witness.slip, identity_hash, &witness.secret, &witness.context);
    debug!("Slip {}: signed={signed} bound={bound}", witness.slip.slip_id);

    Ok(VoteOutput {
        predicate,
        verified_slip: signed && bound,
        slip_id: witness.slip.slip_id,
    })
}

/// JSON submission produced by the prover binary and read by the verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub signature: Signature,
    pub public_key: Bytes64,
    pub message_hash: MessageHash,
    pub message_hash_hash: Hash,
    /// Decimal leaf index the prover claims.
    pub claimed_index: String,
    pub merkle_proof: MerkleProofJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slip: Option<Slip>,
}

impl Submission {
    /// Decodes the submission into a statement against `merkle_root`.
    pub fn to_statement<const DEPTH: usize>(
        &self,
        merkle_root: Hash,
    ) -> Result<Statement<DEPTH>, PredicateError> {
        let proof = MerkleProof::<DEPTH>::from_json(&self.merkle_proof).map_err(|e| match e {
            AccumulatorError::IndexOutOfRange { index, depth } => {
                PredicateError::IndexOutOfRange { index, depth }
            }
            other => PredicateError::InvalidEncoding(other.to_string()),
        })?;
        let claimed_index = self.claimed_index.trim().parse().map_err(|_| {
            PredicateError::InvalidEncoding(format!(
                "invalid claimed index '{}'",
                self.claimed_index
            ))
        })?;
        let public_key = PublicKey::from_bytes64(&self.public_key)?;

        Ok(Statement {
            merkle_root,
            proof,
            claimed_index,
            message_hash: self.message_hash,
            message_hash_hash: self.message_hash_hash,
            signature: self.signature,
            public_key,
            public_key_bytes: self.public_key,
        })
    }
}

/// Boundary to an external proof system that turns the predicate into a
/// succinct artifact.
pub trait ProofEngine {
    type Artifact;
    type Error: std::error::Error + Send + Sync + 'static;

    /// One-time setup (circuit compilation, key generation).
    fn compile(&mut self) -> Result<(), Self::Error>;

    /// Evaluates the predicate and produces an artifact attesting to `output`.
    fn prove(
        &self,
        statement: &Statement,
        config: &PredicateConfig,
    ) -> Result<(PredicateOutput, Self::Artifact), Self::Error>;

    fn verify(&self, output: &PredicateOutput, artifact: &Self::Artifact) -> Result<bool, Self::Error>;
}
