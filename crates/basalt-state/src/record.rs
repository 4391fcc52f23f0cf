//! # Persisted Records
//!
//! Fixed serialization of world-state records. The layout is part of the
//! replay contract and must never change shape:
//!
//! - account at key `A‖addr`: `balance:32 ‖ nonce:8 ‖ is_contract:1`
//! - contract at key `C‖addr`: `code_len:4 ‖ code ‖ balance:32 ‖ nonce:8 ‖
//!   deployed:1 ‖ deployment_block:8 ‖ deployer_len:2 ‖ deployer`
//! - storage slot at key `S‖addr‖key:32`: `value:32`
//!
//! All integers are big-endian. Addresses appear as their 40-character hex
//! form without the `0x` prefix, both in keys and in the deployer field.

use crate::errors::StoreError;
use basalt_primitives::{Address, Word256};

/// Namespace prefix for account records.
pub const NS_ACCOUNT: u8 = b'A';
/// Namespace prefix for contract metadata records.
pub const NS_CONTRACT: u8 = b'C';
/// Namespace prefix for storage-slot records.
pub const NS_STORAGE: u8 = b'S';

// =============================================================================
// STATE STRUCTS
// =============================================================================

/// Account state: balance and nonce, plus a contract marker.
///
/// Accounts are created lazily: reading an unknown address yields the
/// zero-valued state, and the record is only materialized on first write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountState {
    /// Account balance.
    pub balance: Word256,
    /// Account nonce. Monotonically increasing, never decreased.
    pub nonce: u64,
    /// True once a contract has been deployed at this address.
    pub is_contract: bool,
}

/// Contract state: immutable code plus lifecycle metadata.
///
/// Per-slot storage is not embedded here; it lives in the `S` namespace and
/// is collected on demand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContractState {
    /// Deployed bytecode. Immutable after deployment.
    pub code: Vec<u8>,
    /// Contract balance, mirrored from the account record.
    pub balance: Word256,
    /// Contract nonce.
    pub nonce: u64,
    /// False once the contract has self-destructed; code is retained for
    /// replay but the contract is no longer callable.
    pub deployed: bool,
    /// Block number at deployment.
    pub deployment_block: u64,
    /// Address that deployed the contract.
    pub deployer: Address,
}

// =============================================================================
// KEYS
// =============================================================================

/// Key of an account record.
#[must_use]
pub fn account_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(NS_ACCOUNT);
    key.extend_from_slice(address.to_plain_hex().as_bytes());
    key
}

/// Key of a contract metadata record.
#[must_use]
pub fn contract_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(NS_CONTRACT);
    key.extend_from_slice(address.to_plain_hex().as_bytes());
    key
}

/// Key of a storage-slot record.
#[must_use]
pub fn storage_key(address: &Address, slot: &Word256) -> Vec<u8> {
    let mut key = Vec::with_capacity(73);
    key.push(NS_STORAGE);
    key.extend_from_slice(address.to_plain_hex().as_bytes());
    key.extend_from_slice(&slot.to_be_bytes());
    key
}

/// Key prefix covering every storage slot of one contract.
#[must_use]
pub fn storage_prefix(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(NS_STORAGE);
    key.extend_from_slice(address.to_plain_hex().as_bytes());
    key
}

// =============================================================================
// ENCODING
// =============================================================================

/// Serializes an account record.
#[must_use]
pub fn encode_account(state: &AccountState) -> Vec<u8> {
    let mut out = Vec::with_capacity(41);
    out.extend_from_slice(&state.balance.to_be_bytes());
    out.extend_from_slice(&state.nonce.to_be_bytes());
    out.push(u8::from(state.is_contract));
    out
}

/// Deserializes an account record.
///
/// # Errors
///
/// Returns `Corrupt` on any length or flag mismatch.
pub fn decode_account(data: &[u8]) -> Result<AccountState, StoreError> {
    if data.len() != 41 {
        return Err(StoreError::Corrupt(format!(
            "account record has {} bytes, expected 41",
            data.len()
        )));
    }
    let mut balance = [0u8; 32];
    balance.copy_from_slice(&data[..32]);
    let mut nonce = [0u8; 8];
    nonce.copy_from_slice(&data[32..40]);
    let is_contract = match data[40] {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::Corrupt(format!(
                "account contract flag is {other}"
            )))
        }
    };
    Ok(AccountState {
        balance: Word256::from_be_bytes(balance),
        nonce: u64::from_be_bytes(nonce),
        is_contract,
    })
}

/// Serializes a contract record.
#[must_use]
pub fn encode_contract(state: &ContractState) -> Vec<u8> {
    let deployer_hex = state.deployer.to_plain_hex();
    let mut out = Vec::with_capacity(4 + state.code.len() + 51 + deployer_hex.len());
    out.extend_from_slice(&(state.code.len() as u32).to_be_bytes());
    out.extend_from_slice(&state.code);
    out.extend_from_slice(&state.balance.to_be_bytes());
    out.extend_from_slice(&state.nonce.to_be_bytes());
    out.push(u8::from(state.deployed));
    out.extend_from_slice(&state.deployment_block.to_be_bytes());
    out.extend_from_slice(&(deployer_hex.len() as u16).to_be_bytes());
    out.extend_from_slice(deployer_hex.as_bytes());
    out
}

/// Deserializes a contract record.
///
/// # Errors
///
/// Returns `Corrupt` on any structural mismatch.
pub fn decode_contract(data: &[u8]) -> Result<ContractState, StoreError> {
    let corrupt = |what: &str| StoreError::Corrupt(format!("contract record: {what}"));

    if data.len() < 4 {
        return Err(corrupt("missing code length"));
    }
    let code_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let mut pos = 4;
    if data.len() < pos + code_len + 32 + 8 + 1 + 8 + 2 {
        return Err(corrupt("truncated"));
    }
    let code = data[pos..pos + code_len].to_vec();
    pos += code_len;

    let mut balance = [0u8; 32];
    balance.copy_from_slice(&data[pos..pos + 32]);
    pos += 32;

    let mut nonce = [0u8; 8];
    nonce.copy_from_slice(&data[pos..pos + 8]);
    pos += 8;

    let deployed = match data[pos] {
        0 => false,
        1 => true,
        _ => return Err(corrupt("bad deployed flag")),
    };
    pos += 1;

    let mut block = [0u8; 8];
    block.copy_from_slice(&data[pos..pos + 8]);
    pos += 8;

    let deployer_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if data.len() != pos + deployer_len {
        return Err(corrupt("bad deployer length"));
    }
    let deployer_hex = std::str::from_utf8(&data[pos..])
        .map_err(|_| corrupt("deployer is not utf-8"))?;
    let deployer =
        Address::from_hex(deployer_hex).map_err(|_| corrupt("deployer is not an address"))?;

    Ok(ContractState {
        code,
        balance: Word256::from_be_bytes(balance),
        nonce: u64::from_be_bytes(nonce),
        deployed,
        deployment_block: u64::from_be_bytes(block),
        deployer,
    })
}

/// Serializes a storage value.
#[must_use]
pub fn encode_storage_value(value: &Word256) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Deserializes a storage value.
///
/// # Errors
///
/// Returns `Corrupt` if the record is not exactly 32 bytes.
pub fn decode_storage_value(data: &[u8]) -> Result<Word256, StoreError> {
    if data.len() != 32 {
        return Err(StoreError::Corrupt(format!(
            "storage record has {} bytes, expected 32",
            data.len()
        )));
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(data);
    Ok(Word256::from_be_bytes(bytes))
}

/// Decodes the slot key embedded in a full storage record key.
///
/// # Errors
///
/// Returns `Corrupt` if the key does not have the `S‖addr‖key:32` shape.
pub fn decode_storage_slot(key: &[u8]) -> Result<Word256, StoreError> {
    if key.len() != 73 || key[0] != NS_STORAGE {
        return Err(StoreError::Corrupt("malformed storage key".to_string()));
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&key[41..]);
    Ok(Word256::from_be_bytes(bytes))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_round_trip() {
        let state = AccountState {
            balance: Word256::from_u64(123_456),
            nonce: 42,
            is_contract: true,
        };
        let encoded = encode_account(&state);
        assert_eq!(encoded.len(), 41);
        assert_eq!(decode_account(&encoded).unwrap(), state);
    }

    #[test]
    fn test_account_encoding_is_big_endian() {
        let state = AccountState {
            balance: Word256::from_u64(1),
            nonce: 2,
            is_contract: false,
        };
        let encoded = encode_account(&state);
        assert_eq!(encoded[31], 1);
        assert_eq!(encoded[39], 2);
        assert_eq!(encoded[40], 0);
    }

    #[test]
    fn test_account_rejects_bad_length_and_flag() {
        assert!(decode_account(&[0u8; 40]).is_err());
        let mut encoded = encode_account(&AccountState::default());
        encoded[40] = 7;
        assert!(decode_account(&encoded).is_err());
    }

    #[test]
    fn test_contract_round_trip() {
        let state = ContractState {
            code: vec![0x60, 0x05, 0x60, 0x03, 0x01],
            balance: Word256::from_u64(999),
            nonce: 3,
            deployed: true,
            deployment_block: 17,
            deployer: Address::new([0xaa; 20]),
        };
        let encoded = encode_contract(&state);
        assert_eq!(decode_contract(&encoded).unwrap(), state);
    }

    #[test]
    fn test_contract_empty_code_round_trip() {
        let state = ContractState::default();
        assert_eq!(decode_contract(&encode_contract(&state)).unwrap(), state);
    }

    #[test]
    fn test_contract_rejects_truncation() {
        let encoded = encode_contract(&ContractState {
            code: vec![1, 2, 3],
            ..ContractState::default()
        });
        assert!(decode_contract(&encoded[..encoded.len() - 1]).is_err());
        assert!(decode_contract(&[]).is_err());
    }

    #[test]
    fn test_storage_round_trip() {
        let value = Word256::from_u64(0xdead_beef);
        let encoded = encode_storage_value(&value);
        assert_eq!(decode_storage_value(&encoded).unwrap(), value);
        assert!(decode_storage_value(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_keys_are_namespaced_and_ordered() {
        let addr = Address::new([0x11; 20]);
        let slot = Word256::from_u64(5);

        let a = account_key(&addr);
        let c = contract_key(&addr);
        let s = storage_key(&addr, &slot);

        assert_eq!(a[0], b'A');
        assert_eq!(c[0], b'C');
        assert_eq!(s[0], b'S');
        assert_eq!(a.len(), 41);
        assert_eq!(s.len(), 73);
        // Namespace order falls out of byte order.
        assert!(a < c && c < s);
    }

    #[test]
    fn test_storage_keys_sort_by_slot_big_endian() {
        let addr = Address::new([0x11; 20]);
        let low = storage_key(&addr, &Word256::from_u64(1));
        let high = storage_key(&addr, &Word256::from_u64(256));
        assert!(low < high);
        assert_eq!(decode_storage_slot(&low).unwrap(), Word256::from_u64(1));
    }
}
