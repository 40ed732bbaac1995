//! Anonymous membership + ownership assertions
//!
//! This library lets the holder of one key from a public set of identities
//! show that they control a member key and signed a given message, without
//! revealing which member they are. An oracle issues anti-replay slips bound
//! to an identity and a proposal.
//!
//! # Components
//!
//! - [`store`]: key-value storage (in-memory and JSON-file backends) with
//!   scoped sessions
//! - [`MerkleTree`] / [`MerkleProof`]: fixed-depth sparse Poseidon accumulator
//! - [`identity`]: leaf derivation from a public key (address or raw key)
//! - [`ownership`]: ECDSA and BIP-340 verification, key binding checks
//! - [`predicate`]: the combined ownership + membership predicate
//! - [`oracle`]: slip issuance and verification
//!
//! # Example
//!
//! ```no_run
//! use zkp_anon_membership::{identity::address_identity_from_str, store::MemoryStore, MerkleTree};
//!
//! let mut tree: MerkleTree<MemoryStore> = MerkleTree::build(MemoryStore::new()).unwrap();
//! let leaf = address_identity_from_str("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
//! tree.update(0, leaf).unwrap();
//! let proof = tree.prove(0).unwrap();
//! assert!(proof.verify(tree.root(), leaf));
//! ```

pub mod config;
pub mod error;
pub mod ethereum;
pub mod identity;
pub mod keys;
pub mod merkle;
pub mod oracle;
pub mod ownership;
pub mod predicate;
pub mod store;
pub mod types;
pub mod utils;


pub use error::{AccumulatorError, OracleError, PredicateError, StoreError};
pub use keys::{MessageHash, PublicKey, Signature, SignatureScheme};
pub use merkle::{MerkleProof, MerkleTree, TREE_DEPTH};
pub use predicate::{combine, evaluate, PredicateConfig, Statement, Submission};
pub use types::{Bytes64, FixedBytes, Hash, PredicateOutput, VoteOutput};
pub use utils::poseidon_hash;
