//! Error types for the store, accumulator, predicate and oracle layers.
//!
//! Signature and membership failures are never errors: they surface as
//! `false` flags in [`crate::types::PredicateOutput`]. The variants here are
//! reserved for malformed input and infrastructure failures.

use thiserror::Error;

/// Failure of the key-value storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store session is not open")]
    Closed,
}

/// Errors raised by the Merkle accumulator.
#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("index {index} out of range for tree of depth {depth}")]
    IndexOutOfRange { index: u64, depth: usize },

    #[error("no tree state found in store")]
    NotFound,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("stale proof: computed against root {actual}, current root is {expected}")]
    StaleRoot { expected: String, actual: String },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Errors raised while evaluating the ownership + membership predicate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredicateError {
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("claimed index {index} out of range for tree of depth {depth}")]
    IndexOutOfRange { index: u64, depth: usize },

    #[error("public key bytes do not match the curve point used for verification")]
    KeyBindingMismatch,

    #[error("message hash binding does not match the supplied message hash hash")]
    MessageBindingMismatch,
}

/// Errors raised by the slip oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("oracle signing failed: {0}")]
    Signing(String),

    #[error("could not recover signer: {0}")]
    Recovery(String),
}
