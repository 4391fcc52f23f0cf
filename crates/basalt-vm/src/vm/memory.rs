//! # VM Memory
//!
//! Byte-addressable memory that grows monotonically in 32-byte words. Each
//! newly-touched word costs `MEMORY` gas; callers compute and debit the cost
//! before asking for the expansion, so an unpayable access never allocates.

use crate::errors::VmError;
use crate::vm::gas::costs;

/// Memory cap (16 MiB).
pub const MAX_MEMORY_SIZE: usize = 16 * 1024 * 1024;

/// Word size in bytes.
pub const WORD_SIZE: usize = 32;

/// Execution memory.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Creates empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Current size in bytes (always a multiple of 32).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if no memory has been touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current size in 32-byte words.
    #[must_use]
    pub fn word_count(&self) -> u128 {
        (self.data.len() / WORD_SIZE) as u128
    }

    /// Gas cost of growing to cover `end` bytes (3 per new word), without
    /// growing. Computed in 128-bit so absurd offsets cannot wrap.
    #[must_use]
    pub fn expansion_cost(&self, end: u128) -> u128 {
        let new_words = end.div_ceil(WORD_SIZE as u128);
        new_words
            .saturating_sub(self.word_count())
            .saturating_mul(u128::from(costs::MEMORY))
    }

    /// Grows to cover `end` bytes, rounded up to a word boundary. The gas
    /// for the growth must already be paid.
    ///
    /// # Errors
    ///
    /// Returns `MemoryOverflow` past the 16 MiB cap.
    pub fn expand(&mut self, end: u128) -> Result<(), VmError> {
        if end <= self.data.len() as u128 {
            return Ok(());
        }
        if end > MAX_MEMORY_SIZE as u128 {
            return Err(VmError::MemoryOverflow {
                requested: end,
                max: MAX_MEMORY_SIZE,
            });
        }
        let new_len = (end as usize).div_ceil(WORD_SIZE) * WORD_SIZE;
        self.data.resize(new_len, 0);
        Ok(())
    }

    /// Reads 32 bytes at `offset`, zero-filled past the allocated end.
    #[must_use]
    pub fn read_word(&self, offset: usize) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            if let Some(&value) = self.data.get(offset.saturating_add(i)) {
                *byte = value;
            }
        }
        out
    }

    /// Reads `len` bytes at `offset`, zero-filled past the allocated end.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        for (i, byte) in out.iter_mut().enumerate() {
            if let Some(&value) = self.data.get(offset.saturating_add(i)) {
                *byte = value;
            }
        }
        out
    }

    /// Writes a 32-byte word at `offset`. The range must already be covered.
    pub fn write_word(&mut self, offset: usize, value: &[u8; 32]) {
        self.data[offset..offset + 32].copy_from_slice(value);
    }

    /// Writes one byte at `offset`. The offset must already be covered.
    pub fn write_byte(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Writes `bytes` at `offset`. The range must already be covered.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_rounds_to_words() {
        let mut mem = Memory::new();
        mem.expand(10).unwrap();
        assert_eq!(mem.len(), 32);
        mem.expand(33).unwrap();
        assert_eq!(mem.len(), 64);
        // Shrinking never happens.
        mem.expand(1).unwrap();
        assert_eq!(mem.len(), 64);
    }

    #[test]
    fn test_expansion_cost_linear_per_word() {
        let mem = Memory::new();
        assert_eq!(mem.expansion_cost(0), 0);
        assert_eq!(mem.expansion_cost(1), 3);
        assert_eq!(mem.expansion_cost(32), 3);
        assert_eq!(mem.expansion_cost(33), 6);
        assert_eq!(mem.expansion_cost(64), 6);
    }

    #[test]
    fn test_expansion_cost_counts_only_new_words() {
        let mut mem = Memory::new();
        mem.expand(32).unwrap();
        assert_eq!(mem.expansion_cost(32), 0);
        assert_eq!(mem.expansion_cost(64), 3);
    }

    #[test]
    fn test_expansion_cost_huge_offset_does_not_wrap() {
        let mem = Memory::new();
        let cost = mem.expansion_cost(u128::from(u64::MAX) + 32);
        assert!(cost > u128::from(u64::MAX / 64));
    }

    #[test]
    fn test_cap_enforced() {
        let mut mem = Memory::new();
        let result = mem.expand(MAX_MEMORY_SIZE as u128 + 1);
        assert!(matches!(result, Err(VmError::MemoryOverflow { .. })));
    }

    #[test]
    fn test_read_write_word() {
        let mut mem = Memory::new();
        mem.expand(64).unwrap();
        let word = [0x11u8; 32];
        mem.write_word(16, &word);
        assert_eq!(mem.read_word(16), word);
    }

    #[test]
    fn test_read_zero_fills_past_end() {
        let mem = Memory::new();
        assert_eq!(mem.read_word(0), [0u8; 32]);
        assert_eq!(mem.read_bytes(100, 4), vec![0u8; 4]);
    }

    #[test]
    fn test_write_bytes_and_byte() {
        let mut mem = Memory::new();
        mem.expand(32).unwrap();
        mem.write_bytes(5, &[1, 2, 3]);
        mem.write_byte(8, 4);
        assert_eq!(mem.read_bytes(5, 4), vec![1, 2, 3, 4]);
    }
}
