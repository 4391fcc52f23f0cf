//! # Error Types
//!
//! Typed failures for VM execution, contract lifecycle management, and the
//! transaction wire codec. Every VM failure carries a short machine-readable
//! tag that lands in `ExecutionResult::error`; the `Display` form is the
//! human-readable message and goes to logs.

use basalt_primitives::{Address, Word256};
use basalt_state::StoreError;
use thiserror::Error;

// =============================================================================
// VM ERRORS
// =============================================================================

/// Errors that halt VM execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Execution ran out of gas.
    #[error("out of gas")]
    OutOfGas,

    /// Stack overflow (more than 1024 items).
    #[error("stack overflow")]
    StackOverflow,

    /// Stack underflow (pop from an empty stack).
    #[error("stack underflow")]
    StackUnderflow,

    /// Jump to a position that is not a JUMPDEST.
    #[error("invalid jump destination: {destination}")]
    InvalidJump {
        /// The attempted destination.
        destination: Word256,
    },

    /// Unknown opcode, truncated PUSH immediate, or the INVALID opcode.
    #[error("invalid instruction: 0x{0:02X}")]
    InvalidInstruction(u8),

    /// Memory expansion beyond the configured cap.
    #[error("memory overflow: {requested} bytes requested, max {max}")]
    MemoryOverflow {
        /// Bytes the access would have needed.
        requested: u128,
        /// Configured memory cap.
        max: usize,
    },

    /// A documented-fallible arithmetic operation failed. Wrapping
    /// arithmetic never raises this.
    #[error("arithmetic error: {0}")]
    ArithmeticError(String),

    /// The optional instruction-count DoS guard tripped.
    #[error("instruction limit exceeded after {0} instructions")]
    InstructionLimit(u64),

    /// Execution reverted; return data is preserved, state is rolled back.
    #[error("execution reverted")]
    Revert,

    /// A state access failed underneath a handler.
    #[error("state access failed ({tag}): {message}")]
    State {
        /// The store error's machine tag.
        tag: &'static str,
        /// The store error's message.
        message: String,
    },
}

impl VmError {
    /// Short machine-readable tag surfaced in `ExecutionResult::error`.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::OutOfGas => "OutOfGas",
            Self::StackOverflow => "StackOverflow",
            Self::StackUnderflow => "StackUnderflow",
            Self::InvalidJump { .. } => "InvalidJump",
            Self::InvalidInstruction(_) => "InvalidInstruction",
            Self::MemoryOverflow { .. } => "MemoryOverflow",
            Self::ArithmeticError(_) => "ArithmeticError",
            Self::InstructionLimit(_) => "InstructionLimit",
            Self::Revert => "Revert",
            Self::State { tag, .. } => tag,
        }
    }
}

impl From<StoreError> for VmError {
    fn from(err: StoreError) -> Self {
        Self::State {
            tag: err.tag(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// MANAGER ERRORS
// =============================================================================

/// Structured failures from the contract manager. None of these involve a
/// VM invocation.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Bytecode is empty, oversized, or fails validation.
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    /// A deployed contract already occupies the derived address.
    #[error("contract already exists at {0}")]
    ContractExists(Address),

    /// The call target is not a deployed contract.
    #[error("contract not found at {0}")]
    ContractNotFound(Address),

    /// The address string is not syntactically valid.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The payer cannot cover gas prepayment or value transfer.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount that was needed.
        required: Word256,
        /// Amount actually held.
        available: Word256,
    },

    /// The state store failed; the transaction was aborted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ManagerError {
    /// Short machine-readable tag, mirroring [`VmError::tag`].
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidBytecode(_) => "InvalidBytecode",
            Self::ContractExists(_) => "ContractExists",
            Self::ContractNotFound(_) => "ContractNotFound",
            Self::InvalidAddress(_) => "InvalidAddress",
            Self::InsufficientBalance { .. } => "InsufficientBalance",
            Self::Store(err) => err.tag(),
        }
    }
}

// =============================================================================
// CODEC ERRORS
// =============================================================================

/// Errors decoding the transaction wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the structure was complete.
    #[error("truncated transaction payload")]
    Truncated,

    /// A null-terminated address string was missing its terminator or was
    /// not valid UTF-8.
    #[error("malformed address string")]
    MalformedString,

    /// An address field failed the syntactic check.
    #[error("invalid address in transaction: {0}")]
    InvalidAddress(String),

    /// Bytes remained after the structure was complete.
    #[error("trailing bytes after transaction payload")]
    TrailingBytes,

    /// Unknown transaction kind discriminator.
    #[error("unknown transaction kind: 0x{0:02X}")]
    UnknownKind(u8),
}

// =============================================================================
// TESTS
// =============================================================================
