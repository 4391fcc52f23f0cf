//! # Addresses
//!
//! 20-byte account and contract identifiers, rendered as `0x` + 40 lowercase
//! hex digits. The rendered form is load-bearing: contract-address derivation
//! hashes it, and the state store keys records by it.

use crate::hashing::sha256;
use crate::word256::Word256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from address parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The literal was not 40 hex digits (after an optional `0x` prefix).
    #[error("invalid address literal: {0}")]
    InvalidAddress(String),
}

/// A 20-byte address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Creates an address from a 20-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an address from a slice. Returns None if the length is wrong.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == 20 {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(slice);
            Some(Self(bytes))
        } else {
            None
        }
    }

    /// Parses `0x`-prefixed or bare 40-digit hex.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` on any other shape.
    pub fn from_hex(input: &str) -> Result<Self, AddressError> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        if digits.len() != 40 {
            return Err(AddressError::InvalidAddress(input.to_string()));
        }
        let bytes =
            hex::decode(digits).map_err(|_| AddressError::InvalidAddress(input.to_string()))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// Returns the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns true if this is the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Renders 40 lowercase hex digits without a prefix (the persisted form).
    #[must_use]
    pub fn to_plain_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Zero-extends the address into the low 20 bytes of a word.
    #[must_use]
    pub fn to_word(&self) -> Word256 {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(&self.0);
        Word256::from_be_bytes(bytes)
    }

    /// Takes the low 20 bytes of a word as an address.
    #[must_use]
    pub fn from_word(word: Word256) -> Self {
        let bytes = word.to_be_bytes();
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes[12..]);
        Self(out)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_plain_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_plain_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

/// Syntactic address check: nonempty, `0x` prefix, hex tail.
///
/// Semantic validity (does a contract live there) is a state-store question.
#[must_use]
pub fn is_valid_address(input: &str) -> bool {
    match input.strip_prefix("0x") {
        Some(tail) => !tail.is_empty() && tail.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Derives a contract address from its deployer and the deployer's nonce at
/// deployment time.
///
/// The address is `sha256(render(deployer) ‖ decimal(nonce))` truncated to
/// its first 20 bytes, where `render` is the `0x` + 40-hex form. A pure
/// function of its inputs.
#[must_use]
pub fn derive_address(deployer: &Address, nonce: u64) -> Address {
    let input = format!("{deployer}{nonce}");
    let digest = sha256(input.as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    Address(out)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_full_hex() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xab;
        bytes[19] = 0x01;
        let addr = Address::new(bytes);
        assert_eq!(
            addr.to_string(),
            "0xab00000000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_from_hex_round_trip() {
        let addr = Address::new([0x42; 20]);
        assert_eq!(Address::from_hex(&addr.to_string()).unwrap(), addr);
        assert_eq!(Address::from_hex(&addr.to_plain_hex()).unwrap(), addr);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Address::from_hex("0x1234").is_err());
        assert!(Address::from_hex("").is_err());
        assert!(Address::from_hex(&"g".repeat(40)).is_err());
    }

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address("0xab"));
        assert!(is_valid_address("0x0000000000000000000000000000000000000001"));
        assert!(!is_valid_address("ab"));
        assert!(!is_valid_address("0x"));
        assert!(!is_valid_address("0xzz"));
        assert!(!is_valid_address(""));
    }

    #[test]
    fn test_word_round_trip() {
        let addr = Address::new([0x37; 20]);
        assert_eq!(Address::from_word(addr.to_word()), addr);

        let word = addr.to_word();
        let bytes = word.to_be_bytes();
        assert!(bytes[..12].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_derive_address_is_pure() {
        let deployer = Address::new([0x11; 20]);
        assert_eq!(derive_address(&deployer, 1), derive_address(&deployer, 1));
        assert_ne!(derive_address(&deployer, 1), derive_address(&deployer, 2));

        let other = Address::new([0x22; 20]);
        assert_ne!(derive_address(&deployer, 1), derive_address(&other, 1));
    }

    #[test]
    fn test_derive_address_matches_sha256_of_rendered_input() {
        let deployer = Address::new([0x11; 20]);
        let expected = sha256(format!("{deployer}7").as_bytes());
        assert_eq!(derive_address(&deployer, 7).as_bytes(), &expected[..20]);
    }
}
