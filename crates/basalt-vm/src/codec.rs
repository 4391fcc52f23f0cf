//! # Transaction Wire Format
//!
//! Length-prefixed encoding at the transaction-layer boundary: addresses as
//! null-terminated `0x`-hex strings, payloads behind a 4-byte big-endian
//! length, fixed-width integers in the tail.
//!
//! The raw layouts carry no discriminator; for self-describing streams the
//! [`Transaction`] wrapper prefixes one kind byte.

use crate::errors::CodecError;
use crate::manager::{CallTransaction, DeploymentTransaction};
use basalt_primitives::{is_valid_address, Address, Word256};

/// Kind byte for deployment transactions in [`Transaction`] streams.
const KIND_DEPLOY: u8 = 0x00;
/// Kind byte for call transactions in [`Transaction`] streams.
const KIND_CALL: u8 = 0x01;

/// A transaction of either kind, with a self-describing encoding.
#[derive(Clone, Debug)]
pub enum Transaction {
    /// Contract deployment.
    Deploy(DeploymentTransaction),
    /// Contract call.
    Call(CallTransaction),
}

impl Transaction {
    /// Encodes with a leading kind byte.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Deploy(tx) => {
                let mut out = vec![KIND_DEPLOY];
                out.extend_from_slice(&encode_deployment(tx));
                out
            }
            Self::Call(tx) => {
                let mut out = vec![KIND_CALL];
                out.extend_from_slice(&encode_call(tx));
                out
            }
        }
    }

    /// Decodes a kind-prefixed transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] on any structural problem.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (&kind, body) = data.split_first().ok_or(CodecError::Truncated)?;
        match kind {
            KIND_DEPLOY => Ok(Self::Deploy(decode_deployment(body)?)),
            KIND_CALL => Ok(Self::Call(decode_call(body)?)),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

// =============================================================================
// DEPLOYMENT
// =============================================================================

/// Encodes a deployment transaction:
/// `deployer\0 ‖ code_len:4 ‖ code ‖ gas_limit:8 ‖ gas_price:8 ‖ value:32`.
#[must_use]
pub fn encode_deployment(tx: &DeploymentTransaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + tx.code.len());
    push_address(&mut out, &tx.deployer);
    out.extend_from_slice(&(tx.code.len() as u32).to_be_bytes());
    out.extend_from_slice(&tx.code);
    out.extend_from_slice(&tx.gas_limit.to_be_bytes());
    out.extend_from_slice(&tx.gas_price.to_be_bytes());
    out.extend_from_slice(&tx.value.to_be_bytes());
    out
}

/// Decodes a deployment transaction.
///
/// # Errors
///
/// Returns a [`CodecError`] on any structural problem.
pub fn decode_deployment(data: &[u8]) -> Result<DeploymentTransaction, CodecError> {
    let mut cursor = Cursor::new(data);
    let deployer = cursor.address()?;
    let code = cursor.length_prefixed()?;
    let gas_limit = cursor.u64()?;
    let gas_price = cursor.u64()?;
    let value = cursor.word()?;
    cursor.finish()?;
    Ok(DeploymentTransaction {
        deployer,
        code,
        gas_limit,
        gas_price,
        value,
    })
}

// =============================================================================
// CALLS
// =============================================================================

/// Encodes a call transaction:
/// `caller\0 ‖ contract\0 ‖ input_len:4 ‖ input ‖ gas_limit:8 ‖ gas_price:8 ‖ value:32`.
#[must_use]
pub fn encode_call(tx: &CallTransaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(112 + tx.input_data.len());
    push_address(&mut out, &tx.caller);
    push_address(&mut out, &tx.contract);
    out.extend_from_slice(&(tx.input_data.len() as u32).to_be_bytes());
    out.extend_from_slice(&tx.input_data);
    out.extend_from_slice(&tx.gas_limit.to_be_bytes());
    out.extend_from_slice(&tx.gas_price.to_be_bytes());
    out.extend_from_slice(&tx.value.to_be_bytes());
    out
}

/// Decodes a call transaction.
///
/// # Errors
///
/// Returns a [`CodecError`] on any structural problem.
pub fn decode_call(data: &[u8]) -> Result<CallTransaction, CodecError> {
    let mut cursor = Cursor::new(data);
    let caller = cursor.address()?;
    let contract = cursor.address()?;
    let input_data = cursor.length_prefixed()?;
    let gas_limit = cursor.u64()?;
    let gas_price = cursor.u64()?;
    let value = cursor.word()?;
    cursor.finish()?;
    Ok(CallTransaction {
        caller,
        contract,
        input_data,
        gas_limit,
        gas_price,
        value,
    })
}

// =============================================================================
// CURSOR
// =============================================================================

fn push_address(out: &mut Vec<u8>, address: &Address) {
    out.extend_from_slice(address.to_string().as_bytes());
    out.push(0);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.data.len() < self.pos + len {
            return Err(CodecError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn address(&mut self) -> Result<Address, CodecError> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::MalformedString)?;
        let text =
            std::str::from_utf8(&rest[..nul]).map_err(|_| CodecError::MalformedString)?;
        self.pos += nul + 1;
        if !is_valid_address(text) {
            return Err(CodecError::InvalidAddress(text.to_string()));
        }
        Address::from_hex(text).map_err(|_| CodecError::InvalidAddress(text.to_string()))
    }

    fn length_prefixed(&mut self) -> Result<Vec<u8>, CodecError> {
        let len_bytes = self.take(4)?;
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        Ok(self.take(len as usize)?.to_vec())
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(out))
    }

    fn word(&mut self) -> Result<Word256, CodecError> {
        let bytes = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(Word256::from_be_bytes(out))
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
