//! Identity hashes: the leaf values stored in the club tree.
//!
//! Two derivations exist and the tree builder and the verifier must agree on
//! which one is in use:
//!
//! - [`IdentityMode::Address`]: Poseidon over the 20 bytes of the Ethereum
//!   address, one field element per byte. Lets admins build the tree from a
//!   plain address list.
//! - [`IdentityMode::RawKey`]: Poseidon over the two 128-bit limbs of the
//!   key's X coordinate, for x-only (BIP-340 / Nostr) keys.

use crate::ethereum::{ethereum_address, parse_address, ADDRESS_SIZE};
use crate::keys::PublicKey;
use crate::types::Hash;
use crate::utils::{poseidon_hash_many, u256_to_limbs};
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    #[default]
    Address,
    RawKey,
}

impl IdentityMode {
    #[must_use]
    pub fn derive(self, public_key: &PublicKey) -> Hash {
        match self {
            IdentityMode::Address => address_identity(public_key),
            IdentityMode::RawKey => raw_key_identity(public_key),
        }
    }
}

/// Identity of a 20-byte Ethereum address.
#[must_use]
pub fn address_bytes_identity(address: &[u8; ADDRESS_SIZE]) -> Hash {
    let fields: [pallas::Base; ADDRESS_SIZE] =
        std::array::from_fn(|i| pallas::Base::from(u64::from(address[i])));
    Hash::from_field(poseidon_hash_many(fields))
}

/// Address-style identity of a public key.
#[must_use]
pub fn address_identity(public_key: &PublicKey) -> Hash {
    address_bytes_identity(&ethereum_address(public_key))
}

/// Address-style identity from an address string, as read from a row file.
pub fn address_identity_from_str(address: &str) -> anyhow::Result<Hash> {
    Ok(address_bytes_identity(&parse_address(address)?))
}

/// Raw-key identity from a big-endian X coordinate.
#[must_use]
pub fn raw_key_identity_from_x(x: &[u8; 32]) -> Hash {
    Hash::from_field(poseidon_hash_many(u256_to_limbs(x)))
}

#[must_use]
pub fn raw_key_identity(public_key: &PublicKey) -> Hash {
    raw_key_identity_from_x(&public_key.x_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::address_to_string;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_address_identity_matches_string_form() {
        let pk = PublicKey::from_signing_key(&SigningKey::random(&mut OsRng));
        let address = address_to_string(&ethereum_address(&pk));
        assert_eq!(
            address_identity(&pk),
            address_identity_from_str(&address).unwrap()
        );
        assert_eq!(
            address_identity_from_str(&address.to_uppercase().replace("0X", "0x")).unwrap(),
            address_identity(&pk)
        );
    }

    #[test]
    fn test_modes_disagree() {
        let pk = PublicKey::from_signing_key(&SigningKey::random(&mut OsRng));
        assert_ne!(address_identity(&pk), raw_key_identity(&pk));
        assert_eq!(IdentityMode::RawKey.derive(&pk), raw_key_identity(&pk));
        assert_eq!(IdentityMode::Address.derive(&pk), address_identity(&pk));
    }

    #[test]
    fn test_raw_key_identity_ignores_y_parity() {
        let pk = PublicKey::from_signing_key(&SigningKey::random(&mut OsRng));
        let lifted = PublicKey::from_x_only(&pk.x_bytes()).unwrap();
        assert_eq!(raw_key_identity(&pk), raw_key_identity(&lifted));
    }

    #[test]
    fn test_distinct_keys_distinct_identities() {
        let a = PublicKey::from_signing_key(&SigningKey::random(&mut OsRng));
        let b = PublicKey::from_signing_key(&SigningKey::random(&mut OsRng));
        assert_ne!(address_identity(&a), address_identity(&b));
        assert_ne!(raw_key_identity(&a), raw_key_identity(&b));
    }

    #[test]
    fn test_identity_mode_from_toml_value() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: IdentityMode,
        }
        let w: Wrapper = toml::from_str("mode = \"raw_key\"").unwrap();
        assert_eq!(w.mode, IdentityMode::RawKey);
    }
}
