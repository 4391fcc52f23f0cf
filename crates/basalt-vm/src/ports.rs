//! # Outbound Ports
//!
//! The seams between the VM and the world it mutates. Handlers reach state
//! only through these traits, so an execution's writes land in whatever
//! transaction overlay the host has open; commit and rollback stay the
//! host's decision.
//!
//! Everything here is synchronous: the VM never suspends mid-execution.

use crate::errors::VmError;
use basalt_primitives::{Address, Word256};

/// Storage and lifecycle access for the executing contract.
pub trait StateAccess {
    /// Reads a storage slot (zero when unset).
    ///
    /// # Errors
    ///
    /// Returns a state-tagged error if the backing store fails.
    fn storage_get(&mut self, contract: &Address, slot: &Word256) -> Result<Word256, VmError>;

    /// Writes a storage slot.
    ///
    /// # Errors
    ///
    /// Returns a state-tagged error if the backing store fails.
    fn storage_set(
        &mut self,
        contract: &Address,
        slot: &Word256,
        value: Word256,
    ) -> Result<(), VmError>;

    /// Transfers the contract's balance to `beneficiary` and marks the
    /// contract as no longer deployed. Code is retained for replay.
    ///
    /// # Errors
    ///
    /// Returns a state-tagged error if the backing store fails.
    fn self_destruct(&mut self, contract: &Address, beneficiary: &Address)
        -> Result<(), VmError>;
}

/// Recent-block hash oracle backed by the state layer.
pub trait BlockHashes {
    /// Hash of block `number`, or None when out of the recent window.
    fn block_hash(&mut self, number: u64) -> Option<[u8; 32]>;
}
