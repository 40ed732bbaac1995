//! Hex/decimal parsing helpers and the Poseidon primitives shared by the
//! accumulator, identity derivation and slip oracle.

use anyhow::Result;
use halo2_gadgets::poseidon::primitives::{
    self as poseidon, ConstantLength, P128Pow5T3 as PoseidonSpec,
};
use pasta_curves::group::ff::PrimeField;
use pasta_curves::pallas;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

pub(crate) fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if:
/// - The hex string has incorrect length
/// - The hex string contains non-hex characters
///
/// # Examples
///
/// ```
/// use zkp_anon_membership::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

/// Decodes a fixed-width hex string (with or without `0x`) into `N` bytes.
pub fn decode_hex_array<const N: usize>(input: &str) -> Result<[u8; N]> {
    let stripped = validate_and_strip_hex(input, N * 2)?;
    let bytes = hex::decode(stripped)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parses an unsigned decimal string into a 32-byte big-endian integer.
///
/// Returns `None` on empty input, non-digit characters, or overflow past
/// 256 bits. No reduction is applied.
pub fn parse_decimal_u256(input: &str) -> Option<[u8; 32]> {
    let digits = input.trim();
    if digits.is_empty() {
        return None;
    }

    let mut acc = [0u8; 32];
    for c in digits.chars() {
        let mut carry = c.to_digit(10)?;
        for byte in acc.iter_mut().rev() {
            let v = u32::from(*byte) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return None;
        }
    }
    Some(acc)
}

/// Splits a 256-bit big-endian integer into `[high, low]` 128-bit limbs.
///
/// Each limb fits in the Pallas base field without reduction, so distinct
/// 256-bit inputs always map to distinct limb pairs.
#[must_use]
pub fn u256_to_limbs(bytes_be: &[u8; 32]) -> [pallas::Base; 2] {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&bytes_be[..16]);
    lo.copy_from_slice(&bytes_be[16..]);
    [
        pallas::Base::from_u128(u128::from_be_bytes(hi)),
        pallas::Base::from_u128(u128::from_be_bytes(lo)),
    ]
}

/// Poseidon hash of two field elements using `P128Pow5T3`.
///
/// This is the two-child combiner of the Merkle accumulator.
///
/// # Example
///
/// ```
/// use zkp_anon_membership::utils::poseidon_hash;
/// use pasta_curves::pallas;
///
/// let left = pallas::Base::from(1);
/// let right = pallas::Base::from(2);
/// assert_ne!(poseidon_hash(left, right), poseidon_hash(right, left));
/// ```
#[inline]
#[must_use]
pub fn poseidon_hash(left: pallas::Base, right: pallas::Base) -> pallas::Base {
    poseidon_hash_many([left, right])
}

/// Poseidon hash of a fixed number of field elements.
#[inline]
#[must_use]
pub fn poseidon_hash_many<const L: usize>(inputs: [pallas::Base; L]) -> pallas::Base {
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<L>, 3, 2>::init().hash(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_and_strip_hex_valid() {
        let result = validate_and_strip_hex("0x1234abcd", 8);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "1234abcd");
    }

    #[test]
    fn test_validate_and_strip_hex_uppercase_prefix() {
        let result = validate_and_strip_hex("0X1234ABCD", 8);
        assert_eq!(result.unwrap(), "1234ABCD");
    }

    #[test]
    fn test_validate_and_strip_hex_wrong_length() {
        let result = validate_and_strip_hex("0x1234abcd", 10);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be 10 characters"));
    }

    #[test]
    fn test_validate_and_strip_hex_invalid_characters() {
        let result = validate_and_strip_hex("0x1234xyzw", 8);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("non-hex characters"));
    }

    #[test]
    fn test_decode_hex_array() {
        let bytes: [u8; 4] = decode_hex_array("0xdeadbeef").unwrap();
        assert_eq!(bytes, [0xde, 0xad, 0xbe, 0xef]);
        assert!(decode_hex_array::<4>("0xdeadbe").is_err());
    }

    #[test]
    fn test_parse_decimal_u256() {
        let v = parse_decimal_u256("258").unwrap();
        assert_eq!(v[30], 1);
        assert_eq!(v[31], 2);
        assert!(v[..30].iter().all(|&b| b == 0));

        assert!(parse_decimal_u256("").is_none());
        assert!(parse_decimal_u256("12a").is_none());
    }

    #[test]
    fn test_parse_decimal_u256_overflow() {
        // 2^256
        let too_big =
            "115792089237316195423570985008687907853269984665640564039457584007913129639936";
        assert!(parse_decimal_u256(too_big).is_none());
        let max =
            "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(parse_decimal_u256(max).unwrap(), [0xff; 32]);
    }

    #[test]
    fn test_u256_to_limbs_distinguishes_halves() {
        let mut a = [0u8; 32];
        a[15] = 1;
        let mut b = [0u8; 32];
        b[31] = 1;
        assert_ne!(u256_to_limbs(&a), u256_to_limbs(&b));
        assert_eq!(u256_to_limbs(&b)[1], pallas::Base::from(1));
    }

    #[test]
    fn test_poseidon_hash_is_order_sensitive() {
        let a = pallas::Base::from(7);
        let b = pallas::Base::from(9);
        assert_ne!(poseidon_hash(a, b), poseidon_hash(b, a));
        assert_eq!(poseidon_hash(a, b), poseidon_hash_many([a, b]));
    }
}
