//! # Gas Metering
//!
//! The fixed gas schedule. These constants are part of the replay contract:
//! every instance must charge identical amounts for identical programs, so
//! the table must match byte-for-byte across deployments.

/// Named gas costs.
pub mod costs {
    /// Free operations (STOP, RETURN, REVERT, INVALID).
    pub const ZERO: u64 = 0;
    /// Environment and counter pushes.
    pub const BASE: u64 = 2;
    /// Stack traffic and cheap arithmetic.
    pub const VERY_LOW: u64 = 3;
    /// Multiplication.
    pub const LOW: u64 = 5;
    /// Jumps.
    pub const MID: u64 = 8;
    /// Reserved high-cost class.
    pub const HIGH: u64 = 10;
    /// Jump destination marker.
    pub const JUMPDEST: u64 = 1;
    /// Per newly-touched 32-byte memory word.
    pub const MEMORY: u64 = 3;
    /// Keccak-256 over a memory range.
    pub const SHA3: u64 = 30;
    /// Storage read.
    pub const SLOAD: u64 = 50;
    /// Storage write turning a zero slot nonzero. Not in the static table:
    /// the interpreter's SSTORE handler reads the slot's current value and
    /// charges this or `SSTORE_RESET` before writing.
    pub const SSTORE_SET: u64 = 20_000;
    /// Any other storage write, including zero over zero. Charged by the
    /// interpreter's SSTORE handler, not the static table.
    pub const SSTORE_RESET: u64 = 5_000;
    /// Recent-block hash query.
    pub const BLOCKHASH: u64 = 20;
    /// Contract self-destruction.
    pub const SELFDESTRUCT: u64 = 5_000;
}

/// Static per-opcode gas, indexed by opcode byte.
///
/// SSTORE's entry is zero because its cost depends on the slot's current
/// value; the interpreter's SStore handler charges `SSTORE_SET` or
/// `SSTORE_RESET` itself. Memory expansion is charged separately per word.
#[rustfmt::skip]
pub const OPCODE_GAS: [u64; 256] = {
    let mut table = [0u64; 256];

    // Stop and arithmetic
    table[0x00] = costs::ZERO;          // STOP
    table[0x01] = costs::VERY_LOW;      // ADD
    table[0x02] = costs::LOW;           // MUL
    table[0x03] = costs::VERY_LOW;      // SUB
    table[0x04] = costs::VERY_LOW;      // DIV
    table[0x06] = costs::VERY_LOW;      // MOD

    // Comparison and bitwise
    table[0x10] = costs::VERY_LOW;      // LT
    table[0x11] = costs::VERY_LOW;      // GT
    table[0x14] = costs::VERY_LOW;      // EQ
    table[0x15] = costs::VERY_LOW;      // ISZERO
    table[0x16] = costs::VERY_LOW;      // AND
    table[0x17] = costs::VERY_LOW;      // OR
    table[0x18] = costs::VERY_LOW;      // XOR
    table[0x19] = costs::VERY_LOW;      // NOT
    table[0x1B] = costs::VERY_LOW;      // SHL
    table[0x1C] = costs::VERY_LOW;      // SHR
    table[0x1D] = costs::VERY_LOW;      // SAR

    // Hashing
    table[0x20] = costs::SHA3;          // SHA3

    // Environment
    table[0x30] = costs::BASE;          // ADDRESS
    table[0x33] = costs::BASE;          // CALLER
    table[0x34] = costs::BASE;          // CALLVALUE
    table[0x35] = costs::BASE;          // CALLDATALOAD
    table[0x36] = costs::BASE;          // CALLDATASIZE
    table[0x37] = costs::VERY_LOW;      // CALLDATACOPY
    table[0x38] = costs::BASE;          // CODESIZE
    table[0x39] = costs::VERY_LOW;      // CODECOPY
    table[0x3A] = costs::BASE;          // GASPRICE

    // Block information
    table[0x40] = costs::BLOCKHASH;     // BLOCKHASH
    table[0x41] = costs::BASE;          // COINBASE
    table[0x42] = costs::BASE;          // TIMESTAMP
    table[0x43] = costs::BASE;          // NUMBER
    table[0x45] = costs::BASE;          // GASLIMIT

    // Stack, memory, storage, control flow
    table[0x50] = costs::VERY_LOW;      // POP
    table[0x51] = costs::VERY_LOW;      // MLOAD
    table[0x52] = costs::VERY_LOW;      // MSTORE
    table[0x53] = costs::VERY_LOW;      // MSTORE8
    table[0x54] = costs::SLOAD;         // SLOAD
    table[0x55] = costs::ZERO;          // SSTORE (dynamic: the interpreter's
                                        // SStore handler charges SSTORE_SET
                                        // or SSTORE_RESET after reading the
                                        // slot's current value)
    table[0x56] = costs::MID;           // JUMP
    table[0x57] = costs::MID;           // JUMPI
    table[0x58] = costs::BASE;          // PC
    table[0x59] = costs::BASE;          // MSIZE
    table[0x5A] = costs::BASE;          // GAS
    table[0x5B] = costs::JUMPDEST;      // JUMPDEST

    // Push operations (0x5F-0x7F)
    let mut i = 0x5F;
    while i <= 0x7F {
        table[i] = costs::VERY_LOW;
        i += 1;
    }

    // DUP1-DUP8
    i = 0x80;
    while i <= 0x87 {
        table[i] = costs::VERY_LOW;
        i += 1;
    }

    // SWAP1-SWAP8
    i = 0x90;
    while i <= 0x97 {
        table[i] = costs::VERY_LOW;
        i += 1;
    }

    // Termination
    table[0xF3] = costs::ZERO;          // RETURN
    table[0xFD] = costs::ZERO;          // REVERT
    table[0xFE] = costs::ZERO;          // INVALID
    table[0xFF] = costs::SELFDESTRUCT;  // SELFDESTRUCT

    table
};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_schedule() {
        assert_eq!(OPCODE_GAS[0x00], 0); // STOP
        assert_eq!(OPCODE_GAS[0x01], 3); // ADD
        assert_eq!(OPCODE_GAS[0x02], 5); // MUL
        assert_eq!(OPCODE_GAS[0x56], 8); // JUMP
        assert_eq!(OPCODE_GAS[0x57], 8); // JUMPI
        assert_eq!(OPCODE_GAS[0x5B], 1); // JUMPDEST
        assert_eq!(OPCODE_GAS[0x20], 30); // SHA3
        assert_eq!(OPCODE_GAS[0x54], 50); // SLOAD
        assert_eq!(OPCODE_GAS[0x40], 20); // BLOCKHASH
        assert_eq!(OPCODE_GAS[0xFF], 5000); // SELFDESTRUCT
        assert_eq!(OPCODE_GAS[0x33], 2); // CALLER
    }

    #[test]
    fn test_push_dup_swap_all_very_low() {
        for byte in 0x5F..=0x7Fu8 {
            assert_eq!(OPCODE_GAS[byte as usize], 3);
        }
        for byte in 0x80..=0x87u8 {
            assert_eq!(OPCODE_GAS[byte as usize], 3);
        }
        for byte in 0x90..=0x97u8 {
            assert_eq!(OPCODE_GAS[byte as usize], 3);
        }
    }

    #[test]
    fn test_termination_ops_free() {
        assert_eq!(OPCODE_GAS[0xF3], 0);
        assert_eq!(OPCODE_GAS[0xFD], 0);
        assert_eq!(OPCODE_GAS[0xFE], 0);
    }
}
