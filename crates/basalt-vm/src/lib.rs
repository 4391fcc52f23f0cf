//! # basalt-vm
//!
//! The execution core: a deterministic, gas-metered stack VM plus the
//! contract lifecycle manager that wires deployment and call transactions
//! into it.
//!
//! ## Determinism contract
//!
//! For identical `(ExecutionContext, initial state)` every instance produces
//! byte-identical results and byte-identical post-state. Everything that
//! could break that is pinned: the gas table, the SHA3 opcode's hash
//! function (Keccak-256), address derivation (SHA-256 over the rendered
//! deployer and decimal nonce), and the state record encodings.
//!
//! ## Layering
//!
//! The VM reaches state only through the [`ports`] traits; the manager opens
//! a store transaction around each execution, so a failed run rolls back
//! without leaking effects. Gas prepayment and value transfer commit
//! separately and survive execution failure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod codec;
pub mod context;
pub mod errors;
pub mod manager;
pub mod ports;
pub mod vm;

pub use adapter::StoreHost;
pub use codec::Transaction;
pub use context::{BlockContext, ExecutionContext, ExecutionResult, VmConfig, VmStats};
pub use errors::{CodecError, ManagerError, VmError};
pub use manager::{
    CallTransaction, ContractManager, CoreHandle, DeploymentReceipt, DeploymentTransaction,
    ManagerStats, MAX_CODE_SIZE,
};
pub use ports::{BlockHashes, StateAccess};
pub use vm::{validate_bytecode, Opcode, VirtualMachine};
