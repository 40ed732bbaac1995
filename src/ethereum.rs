//! Ethereum address derivation, validation and message hashing.
//!
//! Addresses are handled as raw 20-byte arrays internally and as lowercase
//! hex strings at the edges (row files, logs).

use crate::keys::{MessageHash, PublicKey};
use crate::utils::validate_and_strip_hex;
use anyhow::{Context, Result};
use sha3::{Digest, Keccak256};

/// Expected length of an Ethereum address in hex characters (excluding 0x prefix)
/// Ethereum addresses are 20 bytes = 40 hex characters
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Expected length of an Ethereum private key in hex characters (excluding 0x prefix)
pub const PRIVATE_KEY_HEX_LENGTH: usize = 64;

pub const ADDRESS_SIZE: usize = 20;

/// Keccak-256 digest of `data`.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Ethereum address of a public key: the low 20 bytes of `Keccak256(X‖Y)`.
#[must_use]
pub fn ethereum_address(public_key: &PublicKey) -> [u8; ADDRESS_SIZE] {
    let digest = keccak256(public_key.to_bytes64().as_bytes());
    let mut address = [0u8; ADDRESS_SIZE];
    address.copy_from_slice(&digest[32 - ADDRESS_SIZE..]);
    address
}

/// Lowercase `0x`-prefixed address string.
#[must_use]
pub fn address_to_string(address: &[u8; ADDRESS_SIZE]) -> String {
    format!("0x{}", hex::encode(address))
}

/// Hash of a message as signed by `personal_sign`:
/// `Keccak256("\x19Ethereum Signed Message:\n" ‖ len ‖ message)`.
///
/// # Examples
///
/// ```
/// use zkp_anon_membership::ethereum::eip191_hash;
///
/// let h = eip191_hash(b"hello");
/// assert_eq!(h.to_string().len(), 66);
/// assert_ne!(h, eip191_hash(b"hello!"));
/// ```
#[must_use]
pub fn eip191_hash(message: &[u8]) -> MessageHash {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    MessageHash::new(hasher.finalize().into())
}

/// Validates and normalizes a single Ethereum address.
///
/// Returns a lowercase hex string without the 0x prefix.
///
/// # Errors
///
/// Returns an error if:
/// - The address is not exactly 40 hex characters (excluding 0x prefix)
/// - The address contains non-hex characters
///
/// # Examples
///
/// ```
/// use zkp_anon_membership::ethereum::normalize_address;
///
/// let normalized = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
/// assert_eq!(normalized, "742d35cc6634c0532925a3b844bc454e4438f44e");
/// ```
pub fn normalize_address(address: &str) -> Result<String> {
    validate_and_strip_hex(address, ADDRESS_HEX_LENGTH).map(|s| s.to_lowercase())
}

/// Validates a batch of Ethereum addresses in one pass.
///
/// # Errors
///
/// Returns an error if any address is invalid, with context indicating which address failed
pub fn normalize_addresses_batch(addresses: &[String]) -> Result<Vec<String>> {
    addresses
        .iter()
        .enumerate()
        .map(|(i, addr)| {
            normalize_address(addr).with_context(|| {
                format!("Failed to validate address at line {}: '{}'", i + 1, addr)
            })
        })
        .collect()
}

/// Parses an address string (with or without `0x`) into its 20 bytes.
pub fn parse_address(address: &str) -> Result<[u8; ADDRESS_SIZE]> {
    let normalized = normalize_address(address)?;
    let bytes = hex::decode(normalized).context("Failed to decode address from hex")?;
    let mut out = [0u8; ADDRESS_SIZE];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Validates a single Ethereum address.
///
/// An address is considered valid if:
/// - It is exactly 42 characters (including 0x prefix)
/// - It starts with "0x"
/// - All remaining characters are valid hex digits
/// - It is not the zero address (all zeros)
///
/// # Examples
///
/// ```
/// use zkp_anon_membership::ethereum::validate_address;
///
/// assert!(validate_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e"));
/// assert!(!validate_address("0x0000000000000000000000000000000000000000"));
/// assert!(!validate_address("invalid"));
/// ```
#[must_use]
pub fn validate_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
        && !address[2..].chars().all(|c| c == '0')
}

#[must_use]
pub fn validate_addresses_batch(addresses: &[String]) -> bool {
    addresses.iter().all(|addr| validate_address(addr))
}

/// Validates an Ethereum private key.
///
/// # Errors
///
/// Returns an error if:
/// - The private key is not exactly 64 hex characters (excluding 0x prefix)
/// - The private key contains non-hex characters
/// - The private key is all zeros
pub fn validate_private_key(private_key: &str) -> Result<()> {
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)?;

    if stripped.chars().all(|c| c == '0') {
        return Err(anyhow::anyhow!(
            "Private key cannot be all zeros. Please provide a valid private key."
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::parse_signing_key;

    // Well-known development key (Hardhat/Anvil account #0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn test_ethereum_address_of_known_key() {
        let sk = parse_signing_key(DEV_KEY).unwrap();
        let pk = PublicKey::from_signing_key(&sk);
        assert_eq!(address_to_string(&ethereum_address(&pk)), DEV_ADDRESS);
    }

    #[test]
    fn test_eip191_hash_depends_on_length_prefix() {
        assert_ne!(eip191_hash(b"hello"), eip191_hash(b"hello "));
        assert_ne!(eip191_hash(b""), eip191_hash(b"0"));
    }

    #[test]
    fn test_parse_address() {
        let bytes = parse_address(DEV_ADDRESS).unwrap();
        assert_eq!(bytes[0], 0xf3);
        assert_eq!(bytes[19], 0x66);
        assert!(parse_address("0x1234").is_err());
    }

    #[test]
    fn test_normalize_address_valid() {
        let result = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e");
        assert_eq!(result.unwrap(), "742d35cc6634c0532925a3b844bc454e4438f44e");
    }

    #[test]
    fn test_normalize_address_no_prefix() {
        let result = normalize_address("742d35Cc6634C0532925a3b844Bc454e4438f44e");
        assert_eq!(result.unwrap(), "742d35cc6634c0532925a3b844bc454e4438f44e");
    }

    #[test]
    fn test_normalize_address_invalid_hex() {
        let result = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44g");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_address_all_zero() {
        assert!(!validate_address(
            "0x0000000000000000000000000000000000000000"
        ));
    }

    #[test]
    fn test_validate_private_key_all_zeros() {
        assert!(validate_private_key(
            "0x0000000000000000000000000000000000000000000000000000000000000000"
        )
        .is_err());
        assert!(validate_private_key(DEV_KEY).is_ok());
    }

    #[test]
    fn test_normalize_addresses_batch_reports_line() {
        let addresses = vec![DEV_ADDRESS.to_string(), "0xnothex".to_string()];
        let err = normalize_addresses_batch(&addresses).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
}
